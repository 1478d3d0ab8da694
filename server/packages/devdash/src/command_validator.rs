//! Allowlist guard for dev-server commands.
//!
//! Commands are executed directly (never through a shell), but they are still
//! checked here so that nothing resembling chaining, piping, substitution or
//! redirection ever reaches the spawn path.

use devdash_error::DashboardError;
use thiserror::Error;

/// Package-manager runners. Their arguments must be a permitted script invocation.
pub const RUNNERS: [&str; 4] = ["npm", "yarn", "pnpm", "bun"];

/// Bare runtime binaries. Their arguments are free-form (subject to the metacharacter check).
pub const RUNTIMES: [&str; 1] = ["node"];

/// Scripts a runner may invoke, either as `run <script>` or bare `<script>`.
pub const ALLOWED_SCRIPTS: [&str; 6] = ["dev", "start", "serve", "build", "test", "preview"];

/// Two-character operators are listed before their one-character prefixes so
/// the error names the operator the user actually typed.
const FORBIDDEN_SEQUENCES: [&str; 11] = [
    "&&", "||", ";", "&", "|", "`", "$", "<", ">", "\n", "\r",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("command not allowed: {executable:?}")]
    CommandNotAllowed { executable: String },
    #[error("script not allowed: {script:?}")]
    ScriptNotAllowed { script: String },
    #[error("forbidden character {character:?} in command")]
    ForbiddenCharacter { character: String },
}

impl From<ValidationError> for DashboardError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::CommandNotAllowed { executable } => {
                DashboardError::CommandNotAllowed { executable }
            }
            ValidationError::ScriptNotAllowed { script } => {
                DashboardError::ScriptNotAllowed { script }
            }
            ValidationError::ForbiddenCharacter { character } => {
                DashboardError::ForbiddenCharacter { character }
            }
        }
    }
}

/// Validate a command line. Pure; no side effects.
pub fn validate(command: &str) -> Result<(), ValidationError> {
    if let Some(sequence) = FORBIDDEN_SEQUENCES
        .iter()
        .find(|sequence| command.contains(**sequence))
    {
        return Err(ValidationError::ForbiddenCharacter {
            character: (*sequence).to_string(),
        });
    }

    let mut tokens = command.split_whitespace();
    let executable = tokens.next().unwrap_or_default();
    let rest: Vec<&str> = tokens.collect();

    if RUNTIMES.contains(&executable) {
        return Ok(());
    }
    if !RUNNERS.contains(&executable) {
        return Err(ValidationError::CommandNotAllowed {
            executable: executable.to_string(),
        });
    }

    if is_permitted_script(&rest) {
        Ok(())
    } else {
        Err(ValidationError::ScriptNotAllowed {
            script: rest.join(" "),
        })
    }
}

/// `run <script>` or `<script>`, optionally followed by `-- <flags>` that are
/// forwarded to the script.
fn is_permitted_script(args: &[&str]) -> bool {
    let (script, forwarded) = match args {
        ["run", script, forwarded @ ..] => (*script, forwarded),
        [script, forwarded @ ..] => (*script, forwarded),
        [] => return false,
    };
    if !ALLOWED_SCRIPTS.contains(&script) {
        return false;
    }
    match forwarded {
        [] => true,
        ["--", flags @ ..] => flags.iter().all(|flag| is_plain_flag(flag)),
        _ => false,
    }
}

fn is_plain_flag(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '.' | ':' | '/'))
}

/// Split a validated command into program and arguments.
pub fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = command.split_whitespace().map(str::to_string);
    let program = tokens.next()?;
    Some((program, tokens.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_runner_scripts() {
        for command in [
            "npm run dev",
            "npm start",
            "yarn dev",
            "pnpm run build",
            "bun test",
            "npm run serve",
            "npm run dev -- --port=3001 --host 0.0.0.0",
        ] {
            assert_eq!(validate(command), Ok(()), "{command}");
        }
    }

    #[test]
    fn accepts_runtime_with_arguments() {
        assert_eq!(validate("node server.js --inspect"), Ok(()));
        assert_eq!(validate("node"), Ok(()));
    }

    #[test]
    fn rejects_unknown_executables() {
        assert_eq!(
            validate("rm -rf /"),
            Err(ValidationError::CommandNotAllowed {
                executable: "rm".to_string()
            })
        );
        assert_eq!(
            validate(""),
            Err(ValidationError::CommandNotAllowed {
                executable: String::new()
            })
        );
        assert!(matches!(
            validate("./node_modules/.bin/vite"),
            Err(ValidationError::CommandNotAllowed { .. })
        ));
    }

    #[test]
    fn rejects_unlisted_scripts() {
        assert_eq!(
            validate("npm run deploy"),
            Err(ValidationError::ScriptNotAllowed {
                script: "run deploy".to_string()
            })
        );
        assert!(matches!(validate("npm"), Err(ValidationError::ScriptNotAllowed { .. })));
        assert!(matches!(
            validate("npm install left-pad"),
            Err(ValidationError::ScriptNotAllowed { .. })
        ));
        assert!(matches!(
            validate("npm run dev --port 3000"),
            Err(ValidationError::ScriptNotAllowed { .. })
        ));
    }

    #[test]
    fn names_the_operator_that_was_used() {
        assert_eq!(
            validate("npm run dev && rm -rf /"),
            Err(ValidationError::ForbiddenCharacter {
                character: "&&".to_string()
            })
        );
        assert_eq!(
            validate("node a.js || true"),
            Err(ValidationError::ForbiddenCharacter {
                character: "||".to_string()
            })
        );
    }

    #[test]
    fn metacharacters_win_over_allowlist() {
        assert!(matches!(
            validate("curl x | sh"),
            Err(ValidationError::ForbiddenCharacter { .. })
        ));
    }

    #[test]
    fn split_command_tokenizes_on_whitespace() {
        assert_eq!(
            split_command("npm  run   dev"),
            Some(("npm".to_string(), vec!["run".to_string(), "dev".to_string()]))
        );
        assert_eq!(split_command("   "), None);
    }

    fn metacharacter() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![";", "&&", "||", "|", "`", "$", "<", ">", "\n", "\r", "&", "$("])
    }

    proptest! {
        #[test]
        fn injected_metacharacters_are_always_rejected(
            base in prop::sample::select(vec!["npm run dev", "node server.js", "yarn start", "pnpm dev"]),
            meta in metacharacter(),
            suffix in "[a-z /.-]{0,16}",
            at_front in any::<bool>(),
        ) {
            let command = if at_front {
                format!("{meta}{suffix} {base}")
            } else {
                format!("{base}{meta}{suffix}")
            };
            let result = validate(&command);
            prop_assert!(
                matches!(result, Err(ValidationError::ForbiddenCharacter { .. })),
                "{:?} -> {:?}", command, result
            );
        }

        #[test]
        fn unknown_executables_never_pass(exe in "[a-z]{1,10}") {
            prop_assume!(!RUNNERS.contains(&exe.as_str()) && !RUNTIMES.contains(&exe.as_str()));
            let command = format!("{exe} run dev");
            let result = validate(&command);
            prop_assert!(
                matches!(result, Err(ValidationError::CommandNotAllowed { .. })),
                "{:?} -> {:?}", command, result
            );
        }
    }
}
