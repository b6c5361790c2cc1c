use crate::error::{LaunchError, Result};

const TRAIN_SCRIPT_FLAG: &str = "--train-script";
const LOCAL_FLAG: &str = "--local";

/// Arguments shared by both launchers.
///
/// Only `--train-script` and `--local` belong to the launcher; every other
/// argument, wherever it appears, is kept in order for the training script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherArgs {
    pub train_script: String,
    pub local: bool,
    pub train_args: Vec<String>,
}

impl LauncherArgs {
    /// Splits `args` (without the program name) into launcher and training arguments,
    /// recognizing both `--train-script` and `--local`.
    ///
    /// # Arguments
    /// * `args` - The raw command line arguments.
    /// * `default_script` - Used when `--train-script` is absent, `None` makes it required.
    ///
    /// # Errors
    /// `InvalidArgs` if a launcher flag lacks its value, `--local` isn't a
    /// boolean, or a required `--train-script` is missing.
    pub fn parse<I, S>(args: I, default_script: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::parse_flags(args, default_script, true)
    }

    /// Like `parse`, but only `--train-script` belongs to the launcher.
    ///
    /// `--local` and its value are forwarded to the training script and
    /// `local` is always false.
    ///
    /// # Errors
    /// `InvalidArgs` if `--train-script` lacks its value or is required and missing.
    pub fn parse_script_only<I, S>(args: I, default_script: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::parse_flags(args, default_script, false)
    }

    fn parse_flags<I, S>(args: I, default_script: Option<&str>, with_local: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut train_script = None;
        let mut local = None;
        let mut train_args = Vec::new();

        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };

            let owned = flag == TRAIN_SCRIPT_FLAG || (with_local && flag == LOCAL_FLAG);
            if !owned {
                train_args.push(arg);
                continue;
            }

            let value = match inline {
                Some(value) => value,
                None => args
                    .next()
                    .ok_or_else(|| LaunchError::InvalidArgs(format!("{flag} expects a value")))?,
            };

            if flag == TRAIN_SCRIPT_FLAG {
                train_script = Some(value);
            } else {
                local = Some(parse_bool(&value)?);
            }
        }

        let train_script = train_script
            .or_else(|| default_script.map(str::to_string))
            .ok_or_else(|| LaunchError::InvalidArgs(format!("{TRAIN_SCRIPT_FLAG} is required")))?;

        Ok(Self {
            train_script,
            local: local.unwrap_or(false),
            train_args,
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(LaunchError::InvalidArgs(format!(
            "{LOCAL_FLAG} expects true or false, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_flags_anywhere_rest_forwarded_in_order() {
        let args = LauncherArgs::parse(
            ["--epochs", "3", "--train-script", "train.py", "--lr=0.1", "--local", "TRUE", "-v"],
            None,
        )
        .unwrap();

        assert_eq!(args.train_script, "train.py");
        assert!(args.local);
        assert_eq!(args.train_args, ["--epochs", "3", "--lr=0.1", "-v"]);
    }

    #[test]
    fn inline_values_are_accepted() {
        let args = LauncherArgs::parse(["--train-script=x.py", "--local=false"], None).unwrap();
        assert_eq!(args.train_script, "x.py");
        assert!(!args.local);
        assert!(args.train_args.is_empty());
    }

    #[test]
    fn default_script_applies_when_absent() {
        let args = LauncherArgs::parse(["--batch", "2"], Some("train_maskrcnn.py")).unwrap();
        assert_eq!(args.train_script, "train_maskrcnn.py");
        assert!(!args.local);
        assert_eq!(args.train_args, ["--batch", "2"]);
    }

    #[test]
    fn missing_required_script_is_an_error() {
        let err = LauncherArgs::parse(["--epochs", "3"], None).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgs(_)));
    }

    #[test]
    fn dangling_flag_is_an_error() {
        assert!(LauncherArgs::parse(["--train-script"], None).is_err());
    }

    #[test]
    fn script_only_forwards_local() {
        let args = LauncherArgs::parse_script_only(
            ["--local", "yes", "--lr", "1", "--local=true"],
            Some("train_maskrcnn.py"),
        )
        .unwrap();

        assert_eq!(args.train_script, "train_maskrcnn.py");
        assert!(!args.local);
        assert_eq!(args.train_args, ["--local", "yes", "--lr", "1", "--local=true"]);
    }

    #[test]
    fn local_must_be_boolean() {
        assert!(LauncherArgs::parse(["--train-script", "t.py", "--local", "yes"], None).is_err());
    }
}
