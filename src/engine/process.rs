//! Engine transport: a child process speaking the engine protocol over pipes.

use crossbeam_channel::{unbounded, Receiver};
use log::{debug, warn};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::models::EngineConfig;

const EXIT_WAIT: Duration = Duration::from_millis(500);

/// Bidirectional line channel to one engine
pub trait EngineChannel: Send {
    fn send(&mut self, line: &str) -> EngineResult<()>;

    /// Lines written by the engine; disconnects when the engine exits
    fn lines(&self) -> &Receiver<String>;

    fn close(&mut self);
}

/// Deferred engine start, run on the worker thread
pub type Launcher = Box<dyn FnOnce() -> EngineResult<Box<dyn EngineChannel>> + Send>;

/// Produces launchers for engine configurations
pub trait EngineFactory: Send {
    fn launcher(&self, config: &EngineConfig) -> Launcher;
}

/// Launches executables from the engines directory
#[derive(Debug, Clone)]
pub struct ProcessFactory {
    engines_dir: PathBuf,
}

impl ProcessFactory {
    pub fn new(engines_dir: PathBuf) -> Self {
        ProcessFactory { engines_dir }
    }

    fn command_line(&self, config: &EngineConfig) -> (PathBuf, Vec<String>) {
        let mut path = self.engines_dir.join(&config.engine);
        if cfg!(windows) {
            path.set_extension("exe");
        }
        let mut args = Vec::new();
        if config.engine == "avatar" {
            if let Some(weights) = &config.weights {
                let weights = self
                    .engines_dir
                    .join("avatar_weights")
                    .join(format!("{}.zip", weights));
                args.push("--weights".to_string());
                args.push(weights.display().to_string());
            }
        }
        (path, args)
    }
}

impl EngineFactory for ProcessFactory {
    fn launcher(&self, config: &EngineConfig) -> Launcher {
        let (path, args) = self.command_line(config);
        let name = config.engine.clone();
        Box::new(move || {
            let channel = ProcessChannel::spawn(path, &args, name)?;
            Ok(Box::new(channel) as Box<dyn EngineChannel>)
        })
    }
}

pub struct ProcessChannel {
    name: String,
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    closed: bool,
}

impl ProcessChannel {
    pub fn spawn(path: PathBuf, args: &[String], name: String) -> EngineResult<Self> {
        let mut child = Command::new(&path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                name: name.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::Disconnected)?;
        let stdout = child.stdout.take().ok_or(EngineError::Disconnected)?;

        let (tx, rx) = unbounded();
        thread::Builder::new()
            .name(format!("{}-stdout", name))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        debug!("Started engine {} ({})", name, path.display());
        Ok(ProcessChannel {
            name,
            child,
            stdin,
            lines: rx,
            closed: false,
        })
    }
}

impl EngineChannel for ProcessChannel {
    fn send(&mut self, line: &str) -> EngineResult<()> {
        debug!("{} << {}", self.name, line);
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn lines(&self) -> &Receiver<String> {
        &self.lines
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = writeln!(self.stdin, "quit");
        let _ = self.stdin.flush();
        let deadline = Instant::now() + EXIT_WAIT;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(_) => break,
            }
        }
        warn!("Engine {} did not quit, killing it", self.name);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_gets_weights_argument() {
        let factory = ProcessFactory::new(PathBuf::from("/opt/engines"));
        let mut config = EngineConfig::default_game();
        config.engine = "avatar".to_string();
        config.weights = Some("tal".to_string());
        let (path, args) = factory.command_line(&config);
        assert!(path.starts_with("/opt/engines"));
        assert_eq!(args[0], "--weights");
        assert!(args[1].ends_with("avatar_weights/tal.zip"));
    }

    #[test]
    fn test_missing_executable_is_a_spawn_error() {
        let factory = ProcessFactory::new(PathBuf::from("/nonexistent-engines"));
        let launch = factory.launcher(&EngineConfig::default_game());
        assert!(matches!(launch(), Err(EngineError::Spawn { .. })));
    }
}
