//! Mixer control and audio player processes.

use std::{
    fmt, io,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use crate::error::AudioError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// longest an `amixer` call may take before it is killed
pub const MIXER_TIMEOUT: Duration = Duration::from_secs(2);

/// Polls `child` until it exits or `timeout` passes. `None` means it is still running.
fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            None => return Ok(None),
        }
    }
}

/// A running playback started by an [`AudioBackend`].
pub trait Player: Send + fmt::Debug {
    /// false once playback ended by itself or was terminated
    fn is_running(&mut self) -> bool;

    /// Asks the player to exit and waits at most `grace` for it, then forces it.
    ///
    /// # Errors
    /// if the player couldn't be stopped, it may still be running
    fn terminate(&mut self, grace: Duration) -> Result<(), AudioError>;
}

pub trait AudioBackend: Send + Sync {
    /// Starts playing `target` (a file path or stream address).
    ///
    /// # Errors
    /// if playback couldn't be started
    fn spawn(&self, target: &str, looping: bool, volume: u8)
        -> Result<Box<dyn Player>, AudioError>;
}

pub trait Mixer: Send + Sync {
    /// # Errors
    /// if the volume couldn't be set, callers treat this as a warning
    fn set_volume(&self, percent: u8) -> Result<(), AudioError>;
}

/// Plays targets by spawning an external player, `cvlc` by default.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    command: Vec<String>,
    loop_arg: String,
}

impl ProcessBackend {
    #[must_use]
    pub fn new(command: Vec<String>, loop_arg: impl Into<String>) -> Self {
        Self {
            command,
            loop_arg: loop_arg.into(),
        }
    }
}

impl AudioBackend for ProcessBackend {
    fn spawn(
        &self,
        target: &str,
        looping: bool,
        _volume: u8,
    ) -> Result<Box<dyn Player>, AudioError> {
        let (program, args) = self.command.split_first().ok_or(AudioError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(args);
        if looping {
            command.arg(&self.loop_arg);
        }
        let child = command
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AudioError::Spawn {
                command: program.clone(),
                source,
            })?;
        log::debug!("spawned {program} (pid {}) for {target}", child.id());
        Ok(Box::new(ProcessPlayer {
            child,
            target: target.to_string(),
        }))
    }
}

#[derive(Debug)]
pub struct ProcessPlayer {
    child: Child,
    target: String,
}

impl Player for ProcessPlayer {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self, grace: Duration) -> Result<(), AudioError> {
        if !self.is_running() {
            return Ok(());
        }
        if let Err(e) = request_exit(&self.child) {
            log::warn!("couldn't ask player for {} to exit: {e}", self.target);
        }
        match wait_timeout(&mut self.child, grace) {
            Ok(Some(status)) => {
                log::debug!("player for {} exited with {status}", self.target);
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => log::warn!("couldn't poll player for {}: {e}", self.target),
        }
        log::warn!(
            "player for {} didn't exit within {grace:?}, killing it",
            self.target
        );
        self.child.kill().map_err(AudioError::Terminate)?;
        self.child.wait().map_err(AudioError::Terminate)?;
        Ok(())
    }
}

#[cfg(unix)]
fn request_exit(child: &Child) -> Result<(), AudioError> {
    use rustix::process::{kill_process, Pid, Signal};

    kill_process(Pid::from_child(child), Signal::TERM)
        .map_err(|errno| AudioError::Terminate(errno.into()))
}

// no graceful signal to send, the caller falls through to kill after the grace period
#[cfg(not(unix))]
fn request_exit(_child: &Child) -> Result<(), AudioError> {
    Ok(())
}

/// Sets the system volume through ALSA's `amixer`.
#[derive(Debug, Clone)]
pub struct AmixerMixer {
    program: String,
    control: String,
    timeout: Duration,
}

impl AmixerMixer {
    #[must_use]
    pub fn new(control: impl Into<String>) -> Self {
        Self {
            program: "amixer".to_string(),
            control: control.into(),
            timeout: MIXER_TIMEOUT,
        }
    }

    /// Runs `program` instead of `amixer`, with the same arguments.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Mixer for AmixerMixer {
    fn set_volume(&self, percent: u8) -> Result<(), AudioError> {
        let percent = percent.min(100);
        let command = format!("{} sset {} {percent}%", self.program, self.control);
        let failed = |reason: String| AudioError::Mixer {
            command: command.clone(),
            reason,
        };
        let mut child = Command::new(&self.program)
            .args(["sset", &self.control, &format!("{percent}%")])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| failed(e.to_string()))?;
        match wait_timeout(&mut child, self.timeout).map_err(|e| failed(e.to_string()))? {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(failed(status.to_string())),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(failed(format!("no answer within {:?}", self.timeout)))
            }
        }
    }
}

#[cfg(feature = "rodio")]
pub use self::rodio_backend::{RodioBackend, RodioPlayer};

#[cfg(feature = "rodio")]
mod rodio_backend {
    use std::{fs::File, io::BufReader, thread::JoinHandle, time::Duration};

    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
    use rodio::{Decoder, OutputStream, Sink, Source};

    use super::{AudioBackend, Player};
    use crate::error::AudioError;

    /// Plays local files in process. Streams need the process backend.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RodioBackend;

    impl AudioBackend for RodioBackend {
        fn spawn(
            &self,
            target: &str,
            looping: bool,
            volume: u8,
        ) -> Result<Box<dyn Player>, AudioError> {
            if target.contains("://") {
                return Err(AudioError::Unsupported {
                    target: target.to_string(),
                    reason: "only local files can be played in process".to_string(),
                });
            }
            let file = File::open(target).map_err(|source| AudioError::Spawn {
                command: target.to_string(),
                source,
            })?;
            let (stop, stopped) = crossbeam_channel::bounded(1);
            let (ready_tx, ready) = crossbeam_channel::bounded(1);
            let thread = std::thread::spawn(move || match open_sink(file, looping, volume) {
                Ok((_stream, sink)) => {
                    // the receiver only goes away if spawn gave up on us
                    let _ = ready_tx.send(Ok(()));
                    play_until_stopped(&sink, &stopped);
                }
                Err(reason) => {
                    let _ = ready_tx.send(Err(reason));
                }
            });
            match ready.recv() {
                Ok(Ok(())) => Ok(Box::new(RodioPlayer {
                    stop,
                    thread: Some(thread),
                })),
                Ok(Err(reason)) => Err(AudioError::Unsupported {
                    target: target.to_string(),
                    reason,
                }),
                Err(_) => Err(AudioError::Unsupported {
                    target: target.to_string(),
                    reason: "playback thread died".to_string(),
                }),
            }
        }
    }

    fn open_sink(file: File, looping: bool, volume: u8) -> Result<(OutputStream, Sink), String> {
        let (stream, handle) = OutputStream::try_default().map_err(|e| e.to_string())?;
        let sink = Sink::try_new(&handle).map_err(|e| e.to_string())?;
        let input = Decoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
        sink.set_volume(f32::from(volume) / 100.0);
        if looping {
            sink.append(input.repeat_infinite());
        } else {
            sink.append(input);
        }
        sink.play();
        Ok((stream, sink))
    }

    fn play_until_stopped(sink: &Sink, stopped: &Receiver<()>) {
        while !sink.empty() {
            match stopped.recv_timeout(Duration::from_millis(50)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        sink.stop();
    }

    #[derive(Debug)]
    pub struct RodioPlayer {
        stop: Sender<()>,
        thread: Option<JoinHandle<()>>,
    }

    impl Player for RodioPlayer {
        fn is_running(&mut self) -> bool {
            self.thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
        }

        fn terminate(&mut self, grace: Duration) -> Result<(), AudioError> {
            let _ = self.stop.try_send(());
            let deadline = std::time::Instant::now() + grace;
            while self.is_running() && std::time::Instant::now() < deadline {
                std::thread::sleep(super::POLL_INTERVAL);
            }
            match self.thread.take() {
                Some(thread) if thread.is_finished() => {
                    let _ = thread.join();
                }
                Some(_) => {
                    return Err(AudioError::Terminate(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("rodio playback didn't stop within {grace:?}, detached it"),
                    )));
                }
                None => {}
            }
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let backend = ProcessBackend::new(Vec::new(), "--loop");
        assert!(matches!(
            backend.spawn("tone.mp3", true, 50),
            Err(AudioError::EmptyCommand)
        ));
    }

    #[test]
    fn missing_player_fails_to_spawn() {
        let backend = ProcessBackend::new(vec!["definitely-not-a-player-binary".to_string()], "");
        assert!(matches!(
            backend.spawn("tone.mp3", false, 50),
            Err(AudioError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_a_running_player() {
        // `sleep 30`, the target doubles as the duration
        let backend = ProcessBackend::new(vec!["sleep".to_string()], "");
        let mut player = backend.spawn("30", false, 50).unwrap();
        assert!(player.is_running());
        let started = Instant::now();
        player.terminate(Duration::from_secs(5)).unwrap();
        assert!(!player.is_running());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_kills_a_player_ignoring_term() {
        let backend = ProcessBackend::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "trap '' TERM; exec sleep \"$0\"".to_string(),
            ],
            "",
        );
        let mut player = backend.spawn("30", false, 50).unwrap();
        // give the shell time to install the trap
        thread::sleep(Duration::from_millis(200));
        let started = Instant::now();
        player.terminate(Duration::from_millis(300)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!player.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn stuck_mixer_is_killed_after_timeout() {
        // `yes` ignores the arguments and never exits on its own
        let mixer = AmixerMixer::new("Master")
            .with_program("yes")
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        assert!(matches!(mixer.set_volume(50), Err(AudioError::Mixer { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn mixer_reports_failing_command() {
        let mixer = AmixerMixer::new("Master").with_program("false");
        assert!(matches!(mixer.set_volume(50), Err(AudioError::Mixer { .. })));
        let mixer = AmixerMixer::new("Master").with_program("true");
        mixer.set_volume(150).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn terminate_after_exit_is_ok() {
        let backend = ProcessBackend::new(vec!["true".to_string()], "");
        let mut player = backend.spawn("ignored", false, 50).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(!player.is_running());
        player.terminate(Duration::from_millis(100)).unwrap();
    }
}
