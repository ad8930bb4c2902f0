//! Helpers shared by the external commands the controller shells out to
//! (`git`, `sops`, `docker`).

use std::process::Output;

/// Formats a failed command with both stdout and stderr for better debugging.
pub fn format_command_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    mod unix_tests {
        use super::super::*;
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        fn make_output(status_code: i32, stdout: &[u8], stderr: &[u8]) -> Output {
            Output {
                status: ExitStatus::from_raw(status_code << 8),
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
            }
        }

        #[test]
        fn test_format_command_error_empty_output() {
            let output = make_output(1, b"", b"");
            assert_eq!(
                format_command_error(&output),
                "Command failed with exit code 1"
            );
        }

        #[test]
        fn test_format_command_error_stderr_only() {
            let output = make_output(1, b"", b"fatal: not a git repository");
            assert_eq!(
                format_command_error(&output),
                "fatal: not a git repository"
            );
        }

        #[test]
        fn test_format_command_error_stdout_only() {
            let output = make_output(2, b"stack deploy failed\n", b"");
            assert_eq!(format_command_error(&output), "stack deploy failed");
        }

        #[test]
        fn test_format_command_error_both() {
            let output = make_output(1, b"some output", b"some error");
            assert_eq!(format_command_error(&output), "some error\nsome output");
        }
    }
}
