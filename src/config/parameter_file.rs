//! Reader for elastix-style parameter files.
//!
//! A parameter file holds one parameter per line:
//!
//! ```text
//! // Optimizer settings
//! (MaximumNumberOfIterations 250 250 500)
//! (AutomaticParameterEstimation "true")
//! (SP_A 20.0)
//! ```
//!
//! Values are kept as strings; typed access goes through [`ParameterMap::get`].

use super::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Parsed parameter file: parameter name to its list of raw values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    entries: HashMap<String, Vec<String>>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse parameter-file text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut map = Self::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            let inner = line
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| ConfigError::Parse {
                    line: line_number,
                    message: format!("expected '(Name values...)', found '{line}'"),
                })?;

            let mut tokens = tokenize(inner, line_number)?.into_iter();
            let name = tokens.next().ok_or_else(|| ConfigError::Parse {
                line: line_number,
                message: "empty parameter".to_string(),
            })?;
            let values: Vec<String> = tokens.collect();
            if values.is_empty() {
                return Err(ConfigError::Parse {
                    line: line_number,
                    message: format!("parameter '{name}' has no values"),
                });
            }
            if map.entries.contains_key(&name) {
                return Err(ConfigError::DuplicateParameter {
                    name,
                    line: line_number,
                });
            }
            map.entries.insert(name, values);
        }
        Ok(map)
    }

    /// Read and parse a parameter file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Insert or replace a parameter.
    pub fn set<S: Into<String>>(&mut self, name: S, values: Vec<String>) {
        self.entries.insert(name.into(), values);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of values given for `name` (0 when absent).
    pub fn count(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, Vec::len)
    }

    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Typed value at `index`, `None` when the parameter or entry is absent.
    pub fn get<T: FromParameter>(&self, name: &str, index: usize) -> Result<Option<T>, ConfigError> {
        let Some(raw) = self.entries.get(name).and_then(|values| values.get(index)) else {
            return Ok(None);
        };
        T::from_parameter(raw)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw.clone(),
            })
    }

    /// All values of `name` converted to `T`; `None` when absent.
    pub fn get_all<T: FromParameter>(&self, name: &str) -> Result<Option<Vec<T>>, ConfigError> {
        let Some(values) = self.entries.get(name) else {
            return Ok(None);
        };
        values
            .iter()
            .map(|raw| {
                T::from_parameter(raw).ok_or_else(|| ConfigError::InvalidValue {
                    name: name.to_string(),
                    value: raw.clone(),
                })
            })
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
    }
}

/// Conversion from a raw parameter-file token.
pub trait FromParameter: Sized {
    fn from_parameter(raw: &str) -> Option<Self>;
}

impl FromParameter for bool {
    fn from_parameter(raw: &str) -> Option<Self> {
        match raw {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

impl FromParameter for String {
    fn from_parameter(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

macro_rules! impl_from_parameter_numeric {
    ($($ty:ty),*) => {
        $(
            impl FromParameter for $ty {
                fn from_parameter(raw: &str) -> Option<Self> {
                    <$ty>::from_str(raw).ok()
                }
            }
        )*
    };
}

impl_from_parameter_numeric!(f64, usize, u64);

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let bytes = line.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'/' if !in_quotes && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn tokenize(inner: &str, line: usize) -> Result<Vec<String>, ConfigError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in inner.chars() {
        match c {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(ConfigError::Parse {
            line,
            message: "unterminated string".to_string(),
        });
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
// Optimizer
(Optimizer "AdaptiveStochasticGradientDescent")
(MaximumNumberOfIterations 250 250 500)  // per resolution
(AutomaticParameterEstimation "true")
(SP_A 20.0)
"#;

    #[test]
    fn test_parse_values_and_comments() {
        let map = ParameterMap::parse(SAMPLE).unwrap();
        assert_eq!(map.count("MaximumNumberOfIterations"), 3);
        assert_eq!(
            map.get::<usize>("MaximumNumberOfIterations", 2).unwrap(),
            Some(500)
        );
        assert_eq!(
            map.get::<bool>("AutomaticParameterEstimation", 0).unwrap(),
            Some(true)
        );
        assert_eq!(map.get::<f64>("SP_A", 0).unwrap(), Some(20.0));
        assert_eq!(
            map.get::<String>("Optimizer", 0).unwrap().as_deref(),
            Some("AdaptiveStochasticGradientDescent")
        );
        assert_eq!(map.get::<f64>("SP_a", 0).unwrap(), None);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let map = ParameterMap::parse("(SP_a abc)").unwrap();
        let err = map.get::<f64>("SP_a", 0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_parentheses() {
        let err = ParameterMap::parse("SP_a 1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_duplicate_parameter() {
        let err = ParameterMap::parse("(SP_a 1.0)\n(SP_a 2.0)").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateParameter { line: 2, .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let err = ParameterMap::parse("(Optimizer \"Adaptive)").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_comment_marker_inside_quotes_is_kept() {
        let map = ParameterMap::parse("(Path \"a//b\")").unwrap();
        assert_eq!(map.get::<String>("Path", 0).unwrap().as_deref(), Some("a//b"));
    }
}
