use std::{ffi::OsStr, fmt, io, num::NonZeroI32, process};

use log::debug;

pub struct Command(process::Command);

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self(process::Command::new(program))
    }

    pub fn args<'a, I>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = &'a OsStr>,
    {
        self.0.args(args);
        self
    }

    pub fn try_status(mut self) -> Result<ExitStatus, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("running `{command:?}`...", command = &self.0);
        }

        match self.0.status() {
            Ok(status) => Ok(ExitStatus {
                command: self,
                status,
            }),
            Err(error) => Err(Error::spawn(self, error)),
        }
    }

    pub fn status(self) -> Result<(), Error> {
        self.try_status().and_then(ExitStatus::require_success)
    }

    pub fn try_output(mut self) -> Result<Output, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("capturing `{command:?}`...", command = &self.0);
        }

        match self.0.output() {
            Ok(output) => Ok(Output {
                command: self,
                output,
            }),
            Err(error) => Err(Error::spawn(self, error)),
        }
    }

    pub fn output(self) -> Result<Output, Error> {
        self.try_output().and_then(Output::require_success)
    }

    /// Writes `input` to the stdin of the spawned process and captures its output. Does not check
    /// the exit status.
    pub fn try_output_with_input(mut self, input: Vec<u8>) -> Result<Output, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("capturing `{command:?}` with input...", command = &self.0);
        }

        let spawned = self
            .0
            .stdin(process::Stdio::piped())
            .stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => return Err(Error::spawn(self, error)),
        };

        // Writing from a separate thread prevents a deadlock when the child fills its stdout pipe
        // before consuming all of stdin.
        let stdin_thread = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || {
                use std::io::Write;
                stdin.write_all(&input)
            })
        });

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(error) => return Err(Error::spawn(self, error)),
        };

        if let Some(thread) = stdin_thread {
            match thread.join() {
                Ok(Ok(())) => {}
                // The child may exit without reading its input, its exit status tells the story.
                Ok(Err(error)) if error.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(error)) => return Err(Error::spawn(self, error)),
                Err(_) => {
                    return Err(Error {
                        command: self,
                        kind: ErrorKind::Io(io::ErrorKind::Other),
                    })
                }
            }
        }

        Ok(Output {
            command: self,
            output,
        })
    }
}

#[derive(Debug)]
pub struct ExitStatus {
    command: Command,
    status: process::ExitStatus,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn require_success(self) -> Result<(), Error> {
        let ExitStatus { command, status } = self;
        if status.success() {
            Ok(())
        } else {
            Err(Error {
                command,
                kind: ErrorKind::NonZeroExitStatus {
                    code: status.code().and_then(NonZeroI32::new),
                    stderr: None,
                },
            })
        }
    }
}

#[derive(Debug)]
pub struct Output {
    pub command: Command,
    pub output: process::Output,
}

impl Output {
    pub fn require_success(self) -> Result<Output, Error> {
        if self.output.status.success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Converts an unsuccessful output into an error that carries the captured stderr.
    pub fn into_error(self) -> Error {
        let Output { command, output } = self;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        Error {
            command,
            kind: ErrorKind::NonZeroExitStatus {
                code: output.status.code().and_then(NonZeroI32::new),
                stderr: (!stderr.is_empty()).then_some(stderr),
            },
        }
    }
}

impl std::ops::Deref for Output {
    type Target = process::Output;

    fn deref(&self) -> &Self::Target {
        &self.output
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Io(io::ErrorKind),
    NonZeroExitStatus {
        code: Option<NonZeroI32>,
        stderr: Option<String>,
    },
}

impl From<io::Error> for ErrorKind {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            kind => ErrorKind::Io(kind),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub command: Command,
    pub kind: ErrorKind,
}

impl Error {
    fn spawn(command: Command, error: io::Error) -> Self {
        Self {
            command,
            kind: error.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.command.0.get_program().to_string_lossy();
        write!(f, "failed to run `{program}`: ")?;
        match &self.kind {
            ErrorKind::NotFound => {
                write!(f, "the `{program}` command is required but not available on this system")
            }
            ErrorKind::PermissionDenied => {
                write!(f, "the `{program}` command is available but does not have the right permissions")
            }
            ErrorKind::Io(kind) => write!(f, "{kind}"),
            ErrorKind::NonZeroExitStatus { code, stderr } => {
                match code {
                    Some(code) => write!(f, "exited with non-zero exit code `{code}`")?,
                    None => write!(f, "did not run successfully")?,
                }
                if let Some(stderr) = stderr {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

/// Creates a new [`Command`] and supplies the provided arguments, if any, while calling
/// [`std::convert::AsRef::as_ref`] on each.
macro_rules! command {
    ($program:expr, $($arg:expr),* $(,)?) => {
        $crate::process::args!($crate::process::Command::new($program), $($arg,)*)
    };
}

/// Calls [`Command::args`] on the provided [`Command`] while calling [`std::convert::AsRef::as_ref`]
/// on each argument.
macro_rules! args {
    ($program:expr, $($arg:expr),+ $(,)?) => {
        $program.args([
            $(($arg).as_ref(),)*
        ])
    }
}

pub(crate) use args;
pub(crate) use command;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_reported_as_not_found() {
        let error = command!("gitreceive-this-program-does-not-exist", "--version")
            .output()
            .unwrap_err();
        assert!(matches!(error.kind, ErrorKind::NotFound));
        assert!(error.to_string().contains("is required but not available"));
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let error = command!("sh", "-c", "echo broken >&2; exit 3")
            .output()
            .unwrap_err();
        match error.kind {
            ErrorKind::NonZeroExitStatus { code, stderr } => {
                assert_eq!(code.map(NonZeroI32::get), Some(3));
                assert_eq!(stderr.as_deref(), Some("broken"));
            }
            other => panic!("unexpected error kind {other:?}"),
        }
    }

    #[test]
    fn input_is_written_to_stdin() {
        let output = command!("cat", "-")
            .try_output_with_input(b"hello".to_vec())
            .and_then(Output::require_success)
            .unwrap();
        assert_eq!(output.stdout, b"hello");
    }
}
