//! The control socket: alarm and settings edits, manual playback and status.

use std::{
    io::{self, BufReader},
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::Sender;
use interprocess::local_socket::{prelude::*, GenericNamespaced, Listener, ListenerOptions, Stream};

use crate::{
    alarm::{parse_time, AlarmUpdate, Days, NewAlarm},
    button::{self, Press},
    communication::{read_message, write_message, Action, ClientMessage, ServerMessage},
    error::{ClockError, ProtocolError},
    playback::PlaybackController,
    store::{AlarmStore, SettingsStore},
};

pub struct Server {
    alarms: Arc<dyn AlarmStore>,
    settings: Arc<dyn SettingsStore>,
    playback: Arc<PlaybackController>,
    presses: Option<Sender<Press>>,
}

impl Server {
    pub fn new(
        alarms: Arc<dyn AlarmStore>,
        settings: Arc<dyn SettingsStore>,
        playback: Arc<PlaybackController>,
    ) -> Self {
        Self {
            alarms,
            settings,
            playback,
            presses: None,
        }
    }

    /// Routes `Press` requests through the button queue instead of calling playback directly.
    #[must_use]
    pub fn with_presses(mut self, presses: Sender<Press>) -> Self {
        self.presses = Some(presses);
        self
    }

    /// Answers one request. Failures become [`ServerMessage::Error`].
    pub fn handle(&self, message: ClientMessage) -> ServerMessage {
        log::debug!("request: {message:?}");
        self.dispatch(message).unwrap_or_else(|e| {
            log::warn!("request failed: {e}");
            ServerMessage::Error(e.to_string())
        })
    }

    fn dispatch(&self, message: ClientMessage) -> Result<ServerMessage, ClockError> {
        Ok(match message {
            ClientMessage::ListAlarms => ServerMessage::Alarms(self.alarms.list()?),
            ClientMessage::AddAlarm {
                time,
                days,
                enabled,
            } => {
                let alarm = NewAlarm {
                    time: parse_time(&time)?,
                    days: Days::from_bits(days)?,
                    enabled,
                };
                let alarm = self.alarms.create(alarm)?;
                log::info!("added alarm {alarm}");
                ServerMessage::Alarm(alarm)
            }
            ClientMessage::EditAlarm {
                id,
                time,
                days,
                enabled,
            } => {
                let update = AlarmUpdate {
                    time: time.as_deref().map(parse_time).transpose()?,
                    days: days.map(Days::from_bits).transpose()?,
                    enabled,
                };
                let alarm = self.alarms.update(id, update)?;
                log::info!("edited alarm {alarm}");
                ServerMessage::Alarm(alarm)
            }
            ClientMessage::RemoveAlarm(id) => {
                self.alarms.delete(id)?;
                log::info!("removed alarm {id}");
                ServerMessage::Ok
            }
            ClientMessage::GetSettings => ServerMessage::Settings(self.settings.settings()?),
            ClientMessage::SetSettings(update) => {
                let change = self.settings.update_settings(update)?;
                let settings = self.settings.settings()?;
                if change.volume {
                    self.playback.apply_volume(settings.volume());
                }
                if change.content && self.playback.restart_content()? {
                    log::info!("content switched to {}", settings.content);
                }
                ServerMessage::Settings(settings)
            }
            ClientMessage::Control(action) => {
                self.control(action)?;
                ServerMessage::Ok
            }
            ClientMessage::Press => {
                let queued = self
                    .presses
                    .as_ref()
                    .is_some_and(|presses| button::send_press(presses));
                if !queued {
                    self.playback.press()?;
                }
                ServerMessage::Ok
            }
            ClientMessage::Status => ServerMessage::Status(self.playback.status()),
        })
    }

    fn control(&self, action: Action) -> Result<(), ClockError> {
        log::info!("manual {action:?}");
        match action {
            Action::TestAlarm => self.playback.start_alarm()?,
            Action::TestContent => {
                self.playback.stop();
                self.playback.start_content()?;
            }
            Action::Stop => self.playback.stop(),
        }
        Ok(())
    }

    /// Serves one connection until the client hangs up.
    fn connection(&self, conn: Stream) {
        let mut conn = BufReader::new(conn);
        loop {
            let reply = match read_message::<_, ClientMessage>(&mut conn) {
                Ok(Some(message)) => self.handle(message),
                Ok(None) => break,
                Err(ProtocolError::Json(e)) => {
                    log::warn!("bad request: {e}");
                    ServerMessage::Error(format!("bad request: {e}"))
                }
                Err(e) => {
                    log::warn!("connection failed: {e}");
                    break;
                }
            };
            if let Err(e) = write_message(conn.get_mut(), &reply) {
                log::warn!("couldn't answer client: {e}");
                break;
            }
        }
        log::debug!("client disconnected");
    }

    /// Accepts connections forever, one thread each.
    pub fn serve(self: Arc<Self>, listener: &Listener) {
        for conn in listener.incoming() {
            let conn = match conn {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("incoming connection failed: {e}");
                    continue;
                }
            };
            let server = Arc::clone(&self);
            if let Err(e) = thread::Builder::new()
                .name("control-client".to_string())
                .spawn(move || server.connection(conn))
            {
                log::error!("couldn't spawn client thread: {e}");
            }
        }
    }

    /// # Errors
    /// if the thread couldn't be spawned
    pub fn spawn(self: Arc<Self>, listener: Listener) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("control".to_string())
            .spawn(move || self.serve(&listener))
    }
}

/// Claims the control socket.
///
/// # Errors
/// if the name is invalid or another daemon already holds it
pub fn bind(socket_name: &str) -> io::Result<Listener> {
    let name = socket_name.to_ns_name::<GenericNamespaced>()?;
    let listener = match ListenerOptions::new().name(name).create_sync() {
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            log::error!("{socket_name} is in use, is another bedside_clock daemon running?");
            return Err(e);
        }
        x => x?,
    };
    log::info!("control socket listening at {socket_name}");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        button::press_channel,
        communication::Client,
        config::{Content, SettingKey, SettingsUpdate},
        playback::{
            tests::{controller, FakeBackend, FakeMixer},
            Mode, Status,
        },
        store::MemoryStore,
    };

    fn server() -> (Server, FakeBackend, FakeMixer, Arc<MemoryStore>) {
        let (playback, backend, mixer, store) = controller();
        let server = Server::new(store.clone(), store.clone(), playback);
        (server, backend, mixer, store)
    }

    fn add(server: &Server, time: &str, days: u32) -> ServerMessage {
        server.handle(ClientMessage::AddAlarm {
            time: time.to_string(),
            days,
            enabled: true,
        })
    }

    #[test]
    fn add_and_list_alarms() {
        let (server, _, _, _) = server();
        let ServerMessage::Alarm(late) = add(&server, "08:15", 31) else {
            panic!("expected an alarm");
        };
        let ServerMessage::Alarm(early) = add(&server, "06:45:00", 96) else {
            panic!("expected an alarm");
        };
        assert_eq!(early.days, Days::WEEKEND);
        assert_eq!(
            server.handle(ClientMessage::ListAlarms),
            ServerMessage::Alarms(vec![early, late])
        );
    }

    #[test]
    fn invalid_alarms_are_rejected() {
        let (server, _, _, store) = server();
        assert!(matches!(add(&server, "25:00", 31), ServerMessage::Error(_)));
        assert!(matches!(add(&server, "7.30", 31), ServerMessage::Error(_)));
        assert!(matches!(add(&server, "07:30", 128), ServerMessage::Error(_)));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn edit_and_remove() {
        let (server, _, _, store) = server();
        let ServerMessage::Alarm(alarm) = add(&server, "07:30", 31) else {
            panic!("expected an alarm");
        };
        let reply = server.handle(ClientMessage::EditAlarm {
            id: alarm.id,
            time: Some("07:45".to_string()),
            days: None,
            enabled: Some(false),
        });
        let ServerMessage::Alarm(edited) = reply else {
            panic!("expected an alarm, got {reply:?}");
        };
        assert_eq!(edited.time, parse_time("07:45").unwrap());
        assert_eq!(edited.days, Days::WEEKDAYS);
        assert!(!edited.enabled);

        assert_eq!(server.handle(ClientMessage::RemoveAlarm(alarm.id)), ServerMessage::Ok);
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(
            server.handle(ClientMessage::RemoveAlarm(alarm.id)),
            ServerMessage::Error(_)
        ));
    }

    #[test]
    fn volume_change_reaches_the_mixer() {
        let (server, _, mixer, _) = server();
        let reply = server.handle(ClientMessage::SetSettings(SettingsUpdate {
            volume_percent: Some(80),
            ..SettingsUpdate::default()
        }));
        let ServerMessage::Settings(settings) = reply else {
            panic!("expected settings, got {reply:?}");
        };
        assert_eq!(settings.volume_percent, 80);
        assert_eq!(*mixer.volumes.lock(), vec![80]);
    }

    #[test]
    fn locked_setting_is_refused() {
        let (server, _, mixer, store) = server();
        let mut settings = store.settings().unwrap();
        settings.locked.push(SettingKey::VolumePercent);
        let server = Server::new(
            store.clone(),
            Arc::new(MemoryStore::with_settings(settings)),
            Arc::clone(&server.playback),
        );
        let reply = server.handle(ClientMessage::SetSettings(SettingsUpdate {
            volume_percent: Some(10),
            ..SettingsUpdate::default()
        }));
        assert!(matches!(reply, ServerMessage::Error(_)));
        assert!(mixer.volumes.lock().is_empty());
    }

    #[test]
    fn new_content_source_restarts_content() {
        let (server, backend, _, _) = server();
        server.handle(ClientMessage::Control(Action::TestContent));
        server.handle(ClientMessage::SetSettings(SettingsUpdate {
            content: Some(Content::Stream("http://other.example/live".to_string())),
            ..SettingsUpdate::default()
        }));
        let spawned = backend.audio.spawned.lock().clone();
        assert_eq!(spawned.len(), 2);
        assert_eq!(spawned[1], ("http://other.example/live".to_string(), false));
        assert_eq!(backend.audio.live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_content_source_while_idle_plays_nothing() {
        let (server, backend, _, _) = server();
        server.handle(ClientMessage::SetSettings(SettingsUpdate {
            content: Some(Content::Stream("http://other.example/live".to_string())),
            ..SettingsUpdate::default()
        }));
        assert!(backend.audio.spawned.lock().is_empty());
    }

    #[test]
    fn manual_controls() {
        let (server, backend, _, _) = server();
        assert_eq!(server.handle(ClientMessage::Control(Action::TestAlarm)), ServerMessage::Ok);
        assert_eq!(server.playback.mode(), Mode::Alarm);
        server.handle(ClientMessage::Control(Action::TestContent));
        assert_eq!(server.playback.mode(), Mode::Content);
        server.handle(ClientMessage::Control(Action::Stop));
        assert_eq!(
            server.handle(ClientMessage::Status),
            ServerMessage::Status(Status {
                mode: Mode::Idle,
                target: None,
            })
        );
        assert_eq!(backend.audio.live.load(Ordering::SeqCst), 0);
        assert_eq!(backend.audio.max_live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_is_reported() {
        let (server, backend, _, _) = server();
        backend.audio.fail_spawn.store(true, Ordering::SeqCst);
        assert!(matches!(
            server.handle(ClientMessage::Control(Action::TestAlarm)),
            ServerMessage::Error(_)
        ));
        assert_eq!(server.playback.mode(), Mode::Idle);
    }

    #[test]
    fn press_without_a_listener_goes_to_playback() {
        let (server, _, _, _) = server();
        server.handle(ClientMessage::Control(Action::TestAlarm));
        assert_eq!(server.handle(ClientMessage::Press), ServerMessage::Ok);
        assert_eq!(server.playback.mode(), Mode::Content);
    }

    #[test]
    fn press_is_queued_for_the_listener() {
        let (server, _, _, _) = server();
        let (tx, rx) = press_channel();
        let server = server.with_presses(tx);
        server.handle(ClientMessage::Control(Action::TestAlarm));
        server.handle(ClientMessage::Press);
        assert_eq!(rx.try_recv(), Ok(Press));
        // nobody listened yet
        assert_eq!(server.playback.mode(), Mode::Alarm);
    }

    #[test]
    fn client_talks_to_server_over_the_socket() {
        let name = format!("bedside-clock-test-{}.sock", std::process::id());
        let listener = bind(&name).unwrap();
        let (server, _, _, _) = server();
        Arc::new(server).spawn(listener).unwrap();

        let mut client = Client::connect(&name).unwrap();
        let reply = client
            .request(&ClientMessage::AddAlarm {
                time: "07:30".to_string(),
                days: 31,
                enabled: true,
            })
            .unwrap();
        assert!(matches!(reply, ServerMessage::Alarm(_)));
        let ServerMessage::Alarms(alarms) = client.request(&ClientMessage::ListAlarms).unwrap()
        else {
            panic!("expected alarms");
        };
        assert_eq!(alarms.len(), 1);
        assert!(matches!(
            client.request(&ClientMessage::RemoveAlarm(99)),
            Err(ProtocolError::Server(_))
        ));

        // a second client is served alongside the first
        let mut other = Client::connect(&name).unwrap();
        assert!(matches!(
            other.request(&ClientMessage::Status).unwrap(),
            ServerMessage::Status(_)
        ));
    }
}
