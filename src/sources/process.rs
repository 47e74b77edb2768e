use std::ffi::OsString;
use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command};

use log::{debug, info, warn};

use super::fragments::FragmentExtractor;
use super::{EventSource, Fragments};
use crate::error::{Error, Result};
use crate::types::{QueryFilter, SourceTarget};
use crate::utils::hidden_command;

const QUERY_TOOL: &str = "wevtutil";

/// Runs the event log query tool and scans its XML output as it arrives.
pub struct ProcessSource {
    program: OsString,
    target: SourceTarget,
}

impl ProcessSource {
    pub fn new(target: SourceTarget) -> Self {
        Self {
            program: QUERY_TOOL.into(),
            target,
        }
    }
}

impl EventSource for ProcessSource {
    fn name(&self) -> &'static str {
        "process"
    }

    fn fragments(&mut self, filter: &QueryFilter) -> Result<Fragments<'_>> {
        let args = query_args(&self.target, &filter.render());
        let program = self.program.to_string_lossy().into_owned();
        info!("Querying {} via {}", self.target, program);
        debug!("Query arguments: {:?}", args);

        let mut command = hidden_command(&self.program);
        command.args(&args);
        let fragments = ProcessFragments::spawn(command, program)?;
        Ok(Box::new(fragments))
    }
}

/// Command-line arguments for one query.
pub fn query_args(target: &SourceTarget, filter: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["qe".into()];
    match target {
        SourceTarget::File(path) => {
            args.push(path.as_os_str().to_owned());
            args.push("/lf:true".into());
        }
        SourceTarget::Channel(name) => args.push(name.into()),
    }
    args.push(format!("/q:{filter}").into());
    args.push("/f:XML".into());
    args
}

/// Fragments read from a running child, one blocking line read at a time.
///
/// Once stdout ends the child is waited on; a non-zero exit becomes the
/// final item. Dropping the sequence early kills and reaps the child.
struct ProcessFragments {
    program: String,
    child: Child,
    lines: FragmentExtractor<BufReader<ChildStdout>>,
    finished: bool,
}

impl ProcessFragments {
    fn spawn(mut command: Command, program: String) -> Result<Self> {
        let mut child = command
            .spawn()
            .map_err(|e| Error::SourceUnavailable(format!("failed to start {program}: {e}")))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::SourceUnavailable(format!("{program} stdout was not captured")));
            }
        };

        let lines = match FragmentExtractor::new(BufReader::new(stdout)) {
            Ok(lines) => lines,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        debug!("Started {} (pid {})", program, child.id());
        Ok(Self {
            program,
            child,
            lines,
            finished: false,
        })
    }

    fn wait_exit(&mut self) -> Result<()> {
        let pipe = self.child.stderr.take();
        let stderr = drain_stderr(&mut self.child, pipe)?;

        let status = self.child.wait()?;
        if status.success() {
            debug!("{} exited successfully", self.program);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&stderr);
        Err(Error::backend(
            "process",
            format!("{} exited with {}: {}", self.program, status, stderr.trim()),
        ))
    }
}

/// Reads the child's stderr to the end. If the read fails the child is
/// killed and reaped before the error is returned.
fn drain_stderr<R: Read>(child: &mut Child, pipe: Option<R>) -> Result<Vec<u8>> {
    let mut stderr = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut stderr) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }
    }
    Ok(stderr)
}

impl Iterator for ProcessFragments {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.lines.next() {
            Some(Ok(fragment)) => Some(Ok(fragment)),
            Some(Err(e)) => {
                self.finished = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                Some(Err(e))
            }
            None => {
                self.finished = true;
                self.wait_exit().err().map(Err)
            }
        }
    }
}

impl Drop for ProcessFragments {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Stopping {} before it finished", self.program);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_query_args() {
        let target = SourceTarget::File(PathBuf::from(r"C:\cases\Security.evtx"));
        let args = query_args(&target, "*[System[EventID=4624]]");
        assert_eq!(
            args,
            vec![
                OsString::from("qe"),
                OsString::from(r"C:\cases\Security.evtx"),
                OsString::from("/lf:true"),
                OsString::from("/q:*[System[EventID=4624]]"),
                OsString::from("/f:XML"),
            ]
        );
    }

    #[test]
    fn test_channel_query_args() {
        let target = SourceTarget::Channel("Security".to_string());
        let args = query_args(&target, "*");
        assert_eq!(
            args,
            vec![
                OsString::from("qe"),
                OsString::from("Security"),
                OsString::from("/q:*"),
                OsString::from("/f:XML"),
            ]
        );
    }

    #[test]
    fn test_missing_tool_is_source_unavailable() {
        let command = hidden_command("winevt-extract-no-such-tool");
        let err = ProcessFragments::spawn(command, "missing".to_string())
            .err()
            .unwrap();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ProcessFragments {
        let mut command = hidden_command("sh");
        command.args(["-c", script]);
        ProcessFragments::spawn(command, "sh".to_string()).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_streams_fragments_then_succeeds() {
        let fragments = shell(
            "printf 'banner\\n<Event>\\n<EventID>1</EventID>\\n</Event>\\n<Event><EventID>2</EventID></Event>\\n'",
        )
        .collect::<Result<Vec<_>>>()
        .unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], "<Event>\n<EventID>1</EventID>\n</Event>\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_after_partial_output() {
        let mut fragments = shell(
            "printf '<Event><EventID>1</EventID></Event>\\n'; echo 'access denied' >&2; exit 5",
        );

        assert!(fragments.next().unwrap().is_ok());
        match fragments.next() {
            Some(Err(Error::BackendExecutionFailed { backend, detail })) => {
                assert_eq!(backend, "process");
                assert!(detail.contains("access denied"));
            }
            other => panic!("expected backend failure, got {other:?}"),
        }
        assert!(fragments.next().is_none());
    }

    #[cfg(unix)]
    struct BrokenPipe;

    #[cfg(unix)]
    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stderr closed"))
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_read_failure_reaps_child() {
        let mut command = hidden_command("sh");
        command.args(["-c", "sleep 30"]);
        let mut child = command.spawn().unwrap();

        let err = drain_stderr(&mut child, Some(BrokenPipe)).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_drop_before_end_kills_child() {
        let mut fragments = shell("printf '<Event></Event>\\n'; sleep 30");
        assert!(fragments.next().unwrap().is_ok());
        drop(fragments);
    }
}
