//! Command line templates
//!
//! Tool commands are configured as shell-like strings (`npm run lint`,
//! `trivy image --exit-code 1 ${IMAGE_REF}`). They are split into a program
//! and arguments with `shell-words`; no shell is involved at run time.
//!
//! ## Variable Expansion
//!
//! Variables are expanded using the `${VAR_NAME}` syntax:
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use shipline::expand_variables;
//!
//! let env = BTreeMap::from([("BUILD_NUMBER".to_string(), "42".to_string())]);
//! assert_eq!(expand_variables("webapp:${BUILD_NUMBER}", &env), "webapp:42");
//! ```

use super::runner::Invocation;
use crate::pipeline::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern is valid"));

/// Expands `${VAR}` references against `env`
///
/// Unknown variables are left untouched.
pub fn expand_variables(input: &str, env: &BTreeMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = caps.get(1).map_or("", |m| m.as_str());
            match env.get(var_name) {
                Some(value) => value.clone(),
                None => caps
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .to_string()
}

/// A configured command, split into program and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// Parses a command line for the slot `name`
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCommand`] for unbalanced quotes or
    /// an empty command.
    pub fn parse(name: &str, line: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidCommand {
            name: name.to_string(),
            reason,
        };

        let mut words = shell_words::split(line).map_err(|e| invalid(e.to_string()))?;
        if words.is_empty() {
            return Err(invalid("command is empty".to_string()));
        }

        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    /// Program to run
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, unexpanded
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Creates an invocation of this command
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.program).args(self.args.iter().cloned())
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(self.args.iter());
        f.write_str(&shell_words::join(words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_expand_variables_simple() {
        let env = env(&[("BUILD_NUMBER", "123"), ("PROJECT", "my-app")]);
        assert_eq!(expand_variables("echo ${BUILD_NUMBER}", &env), "echo 123");
    }

    #[test]
    fn test_expand_variables_multiple() {
        let env = env(&[("BUILD_NUMBER", "456"), ("PROJECT", "test-project")]);
        assert_eq!(
            expand_variables("Building ${PROJECT} #${BUILD_NUMBER}", &env),
            "Building test-project #456"
        );
    }

    #[test]
    fn test_expand_variables_not_found() {
        let env = env(&[("FOO", "bar")]);
        assert_eq!(expand_variables("echo ${UNKNOWN}", &env), "echo ${UNKNOWN}");
    }

    #[test]
    fn test_expand_variables_bare_dollar_untouched() {
        let env = env(&[("FOO", "bar")]);
        assert_eq!(expand_variables("echo $FOO", &env), "echo $FOO");
    }

    #[test]
    fn test_template_parse() {
        let template = CommandTemplate::parse(
            "scan",
            "trivy image --exit-code 1 --severity HIGH,CRITICAL ${IMAGE_REF}",
        )
        .unwrap();

        assert_eq!(template.program(), "trivy");
        assert_eq!(template.args().len(), 6);
        assert_eq!(template.args()[5], "${IMAGE_REF}");
    }

    #[test]
    fn test_template_parse_quotes() {
        let template =
            CommandTemplate::parse("test", r#"npm test -- --grep "smoke suite""#).unwrap();
        assert_eq!(template.args(), ["test", "--", "--grep", "smoke suite"]);
        assert_eq!(template.to_string(), "npm test -- --grep 'smoke suite'");
    }

    #[test]
    fn test_template_rejects_empty_and_unbalanced() {
        assert!(matches!(
            CommandTemplate::parse("lint", "   "),
            Err(ValidationError::InvalidCommand { .. })
        ));
        assert!(matches!(
            CommandTemplate::parse("lint", "npm run \"lint"),
            Err(ValidationError::InvalidCommand { .. })
        ));
    }
}
