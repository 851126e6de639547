use super::DiagnosticsError;
use crate::estimation::CovarianceSnapshot;
use crate::observers::IterationProgress;
use crate::optimizer::settings::SettingsRecord;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Settings vector in parameter-file syntax, one entry per resolution:
///
/// ```text
/// (SP_a 1250.5 830.2)
/// (SP_A 20 20)
/// ...
/// ```
///
/// The output can be read back with [`crate::config::ParameterMap::parse`].
pub fn format_settings_vector(settings: &[SettingsRecord]) -> String {
    let rows: [(&str, fn(&SettingsRecord) -> f64); 6] = [
        ("SP_a", |s| s.a),
        ("SP_A", |s| s.big_a),
        ("SP_alpha", |s| s.alpha),
        ("SigmoidMax", |s| s.fmax),
        ("SigmoidMin", |s| s.fmin),
        ("SigmoidScale", |s| s.omega),
    ];

    let mut out = String::new();
    for (name, field) in rows {
        out.push('(');
        out.push_str(name);
        for record in settings {
            let _ = write!(out, " {}", field(record));
        }
        out.push_str(")\n");
    }
    out
}

/// Plain-text dump of a covariance snapshot: comment header, then one row per line.
pub fn write_covariance_matrix<W: Write>(
    writer: &mut W,
    snapshot: &CovarianceSnapshot,
) -> Result<(), DiagnosticsError> {
    let (rows, cols) = snapshot.matrix.shape();
    if rows != cols {
        return Err(DiagnosticsError::NonSquare { rows, cols });
    }
    writeln!(writer, "// Covariance matrix, resolution {}", snapshot.level)?;
    writeln!(
        writer,
        "// sigma1 = {:e}, sigma3 = {:e}",
        snapshot.sigma1, snapshot.sigma3
    )?;
    writeln!(writer, "// {rows} x {cols}")?;
    for row in snapshot.matrix.row_iter() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "{}", line.join(" "))?;
    }
    Ok(())
}

/// Write a covariance snapshot to `path`.
pub fn save_covariance_matrix<P: AsRef<Path>>(
    path: P,
    snapshot: &CovarianceSnapshot,
) -> Result<(), DiagnosticsError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_covariance_matrix(&mut writer, snapshot)?;
    writer.flush()?;
    Ok(())
}

/// Recorded progress as CSV with a header row.
pub fn write_progress_csv<W: Write>(
    writer: W,
    progress: &[IterationProgress],
) -> Result<(), DiagnosticsError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for record in progress {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AsgdConfig, ParameterMap};
    use nalgebra::DMatrix;

    fn record(a: f64, fmin: f64) -> SettingsRecord {
        SettingsRecord {
            a,
            big_a: 20.0,
            alpha: 1.0,
            fmax: 1.0,
            fmin,
            omega: 1e-3,
        }
    }

    #[test]
    fn test_settings_vector_reads_back() {
        let settings = vec![record(1250.5, -0.3), record(830.25, -0.7)];
        let text = format_settings_vector(&settings);
        assert!(text.starts_with("(SP_a 1250.5 830.25)\n"));

        let config = AsgdConfig::from_parameter_map(&ParameterMap::parse(&text).unwrap()).unwrap();
        for (level, expected) in settings.iter().enumerate() {
            let restored = SettingsRecord::from_options(&config.options_for(level));
            assert_eq!(&restored, expected);
        }
    }

    #[test]
    fn test_empty_settings_vector() {
        let text = format_settings_vector(&[]);
        assert_eq!(text.lines().count(), 6);
        assert!(text.contains("(SP_alpha)"));
    }

    #[test]
    fn test_covariance_dump() {
        let snapshot = CovarianceSnapshot {
            level: 1,
            sigma1: 0.5,
            sigma3: 0.25,
            matrix: DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]),
        };
        let mut out = Vec::new();
        write_covariance_matrix(&mut out, &snapshot).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "// Covariance matrix, resolution 1");
        assert_eq!(lines[2], "// 2 x 2");
        assert_eq!(lines[3], "2 0.5");
        assert_eq!(lines[4], "0.5 1");
    }

    #[test]
    fn test_non_square_covariance() {
        let snapshot = CovarianceSnapshot {
            level: 0,
            sigma1: 0.0,
            sigma3: 0.0,
            matrix: DMatrix::zeros(2, 3),
        };
        let mut out = Vec::new();
        assert!(matches!(
            write_covariance_matrix(&mut out, &snapshot),
            Err(DiagnosticsError::NonSquare { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn test_progress_csv_header() {
        let progress = vec![IterationProgress {
            level: 0,
            iteration: 3,
            metric: 0.5,
            gain: 0.25,
            time: 1.0,
            gradient_norm: 2.0,
        }];
        let mut out = Vec::new();
        write_progress_csv(&mut out, &progress).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("level,iteration,metric,gain,time,gradient_norm")
        );
        assert_eq!(lines.next(), Some("0,3,0.5,0.25,1.0,2.0"));
    }
}
