//! Dotted parameter paths
//!
//! `module.param` addresses a plain parameter, `module.param[i]` an
//! indexed one (e.g. a sequencer's per-step values).

use serde::{Deserialize, Serialize};
use std::fmt;

use gw_core::{GwError, GwResult};

/// Parsed parameter path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamPath {
    pub module: String,
    pub param: String,
    pub index: Option<usize>,
}

impl ParamPath {
    pub fn new(module: &str, param: &str) -> Self {
        Self {
            module: module.to_string(),
            param: param.to_string(),
            index: None,
        }
    }

    pub fn indexed(module: &str, param: &str, index: usize) -> Self {
        Self {
            module: module.to_string(),
            param: param.to_string(),
            index: Some(index),
        }
    }

    /// Parse `module.param` or `module.param[i]`
    pub fn parse(text: &str) -> GwResult<Self> {
        let (module, rest) = text
            .split_once('.')
            .ok_or_else(|| GwError::InvalidParam(format!("path '{text}' is missing '.'")))?;
        if module.is_empty() || rest.is_empty() {
            return Err(GwError::InvalidParam(format!("malformed path '{text}'")));
        }

        if let Some(open) = rest.find('[') {
            let close = rest
                .rfind(']')
                .filter(|&c| c == rest.len() - 1 && c > open + 1)
                .ok_or_else(|| GwError::InvalidParam(format!("malformed index in '{text}'")))?;
            let param = &rest[..open];
            let index: usize = rest[open + 1..close]
                .parse()
                .map_err(|_| GwError::InvalidParam(format!("malformed index in '{text}'")))?;
            if param.is_empty() {
                return Err(GwError::InvalidParam(format!("malformed path '{text}'")));
            }
            Ok(Self::indexed(module, param, index))
        } else {
            Ok(Self::new(module, rest))
        }
    }
}

impl fmt::Display for ParamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}.{}[{}]", self.module, self.param, i),
            None => write!(f, "{}.{}", self.module, self.param),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let path = ParamPath::parse("pool1.position").unwrap();
        assert_eq!(path.module, "pool1");
        assert_eq!(path.param, "position");
        assert_eq!(path.index, None);
        assert_eq!(path.to_string(), "pool1.position");
    }

    #[test]
    fn test_parse_indexed() {
        let path = ParamPath::parse("t1.position[4]").unwrap();
        assert_eq!(path.module, "t1");
        assert_eq!(path.param, "position");
        assert_eq!(path.index, Some(4));
        assert_eq!(path.to_string(), "t1.position[4]");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ParamPath::parse("nodot").is_err());
        assert!(ParamPath::parse(".param").is_err());
        assert!(ParamPath::parse("module.").is_err());
        assert!(ParamPath::parse("m.p[x]").is_err());
        assert!(ParamPath::parse("m.p[1").is_err());
        assert!(ParamPath::parse("m.[1]").is_err());
    }
}
