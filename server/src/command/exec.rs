//! Shell execution of remote commands

use provision_shared::{cache_request::Destination, CacheRequest, ExecRequest, ExecResponse};
use tokio::process::Command;
use tracing::{debug, warn};

/// Quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Run `command args...` through `sh -c`
///
/// Arguments are joined unquoted so callers can pass redirections and `||`.
pub async fn run_exec(request: &ExecRequest) -> ExecResponse {
    let line = std::iter::once(request.command.as_str())
        .chain(request.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    debug!("exec: {}", line);

    match Command::new("sh").arg("-c").arg(&line).output().await {
        Ok(output) => ExecResponse {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.status.code().unwrap_or(-1),
            error_message: String::new(),
        },
        Err(e) => {
            warn!("failed to spawn `{}`: {}", line, e);
            ExecResponse::spawn_failed(format!("spawn failed: {e}"))
        }
    }
}

/// Shell pipeline that fetches `request.source` into its destination
pub fn fetch_script(fetch_command: &str, request: &CacheRequest) -> String {
    let fetch = match request.source.strip_prefix("file://") {
        Some(path) => format!("cat {}", shell_quote(path)),
        None => format!("{} {}", fetch_command, shell_quote(&request.source)),
    };
    match &request.destination {
        Some(Destination::File(path)) => format!("{fetch} > {}", shell_quote(path)),
        Some(Destination::Pipe(command)) => format!("{fetch} | {command}"),
        None => format!("{fetch} > /dev/null"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(command: &str, args: &[&str]) -> ExecRequest {
        ExecRequest {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let response = run_exec(&exec("echo", &["-n", "hello"])).await;
        assert_eq!(response.exit_status, 0);
        assert_eq!(response.stdout, b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_exec_reports_exit_status_and_stderr() {
        let response = run_exec(&exec("ls", &["/definitely/not/here"])).await;
        assert_ne!(response.exit_status, 0);
        assert!(!response.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_exec_honours_shell_syntax() {
        let response = run_exec(&exec("[", &["-e", "/", "]", "&&", "echo", "-n", "1", "||", "echo", "-n", "0"])).await;
        assert_eq!(response.stdout, b"1".to_vec());
    }

    #[test]
    fn test_fetch_scripts() {
        let to_file = CacheRequest {
            source: "file:///srv/images/it's.bin".into(),
            destination: Some(Destination::File("/tmp/out.bin".into())),
        };
        assert_eq!(
            fetch_script("curl -sfL", &to_file),
            r"cat '/srv/images/it'\''s.bin' > '/tmp/out.bin'"
        );

        let piped = CacheRequest {
            source: "http://cache:8082/download/img.gz".into(),
            destination: Some(Destination::Pipe("gzip -d | dd of=/dev/sda5".into())),
        };
        assert_eq!(
            fetch_script("curl -sfL", &piped),
            "curl -sfL 'http://cache:8082/download/img.gz' | gzip -d | dd of=/dev/sda5"
        );
    }
}
