//! # Parameter Files
//!
//! Parameters live as toml files under `$MPC_SW_ROOT/params` and are deserialised straight into
//! each module's `Params` struct.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable (MPC_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot read parameter file {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Invalid parameter file: {0}")]
    DeserialiseError(toml::de::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load the parameter file at `file_name` relative to `$MPC_SW_ROOT/params`.
pub fn load<P: DeserializeOwned>(file_name: &str) -> Result<P, LoadError> {
    let path = crate::host::get_sw_root()
        .map_err(|_| LoadError::SwRootNotSet)?
        .join("params")
        .join(file_name);

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| LoadError::FileLoadError(path.clone(), e))?;

    parse(&contents)
}

/// Deserialise parameters from toml text.
pub fn parse<P: DeserializeOwned>(contents: &str) -> Result<P, LoadError> {
    toml::from_str(contents).map_err(LoadError::DeserialiseError)
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Example {
        horizon: usize,
        gain: f64,
    }

    #[test]
    fn test_parse() {
        let p: Example = parse("horizon = 15\ngain = 0.5\n").unwrap();
        assert_eq!(p.horizon, 15);
        assert_eq!(p.gain, 0.5);

        assert!(matches!(
            parse::<Example>("horizon = 15\n"),
            Err(LoadError::DeserialiseError(_))
        ));
    }
}
