//! Color policy for log output.
//!
//! The `--color` flag wins when it is explicit. In `auto` mode `NO_COLOR`
//! and `EMACS` turn colors off, otherwise colors follow whether stderr is a
//! terminal. The agent usually runs under a supervisor with stderr piped to
//! a journal, so `auto` resolves to plain text there.

use std::env;

/// When to emit ANSI colors.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorWhen {
    /// Enable colors only when output is a TTY.
    #[default]
    Auto,

    /// Always enable colors.
    Always,

    /// Never enable colors.
    Never,
}

impl ColorWhen {
    // ---
    /// Resolves the policy against the current environment and stderr.
    pub fn should_color_stderr(self) -> bool {
        // ---
        self.resolve(
            env::var_os("NO_COLOR").is_some(),
            env::var_os("EMACS").is_some(),
            atty::is(atty::Stream::Stderr),
        )
    }

    fn resolve(self, no_color: bool, emacs: bool, is_tty: bool) -> bool {
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => !no_color && !emacs && is_tty,
        }
    }
}
