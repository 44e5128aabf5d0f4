//! Wires the stores, playback, scheduler, button and control socket together.

use std::{io, sync::Arc};

use crate::{
    audio::{AmixerMixer, ProcessBackend},
    button::{self, SysfsButton},
    config::{Backend, Config},
    error::ClockError,
    playback::PlaybackController,
    scheduler::Scheduler,
    server::{self, Server},
    store::{FileStore, SettingsStore},
};

fn playback(config: &Config, settings: Arc<dyn SettingsStore>) -> PlaybackController {
    let mixer = AmixerMixer::new(&config.mixer_control);
    let process = || ProcessBackend::new(config.player.clone(), &config.loop_arg);
    match config.backend {
        Backend::Process => {
            PlaybackController::new(process(), mixer, settings, config.stop_grace())
        }
        #[cfg(feature = "rodio")]
        Backend::Rodio => PlaybackController::new(
            crate::audio::RodioBackend,
            mixer,
            settings,
            config.stop_grace(),
        ),
        #[cfg(not(feature = "rodio"))]
        Backend::Rodio => {
            log::warn!("built without rodio, falling back to {:?}", config.player);
            PlaybackController::new(process(), mixer, settings, config.stop_grace())
        }
    }
}

/// Runs the clock until the scheduler thread dies.
///
/// # Errors
/// if the state file can't be opened, the control socket is taken or a thread
/// couldn't be started
pub fn run(config: &Config) -> Result<(), ClockError> {
    let state_path = config.state_path()?;
    let store = Arc::new(FileStore::open(&state_path)?);
    log::info!("alarms and settings at {}", state_path.display());

    let playback = Arc::new(playback(config, store.clone()));
    match store.settings() {
        Ok(settings) => playback.apply_volume(settings.volume()),
        Err(e) => log::warn!("couldn't read settings for startup volume: {e}"),
    }

    let listener = server::bind(&config.socket_name)?;
    let mut control = Server::new(store.clone(), store.clone(), Arc::clone(&playback));

    if config.button {
        let (presses, received) = button::press_channel();
        button::spawn_listener(received, Arc::clone(&playback))?;
        let input = SysfsButton::new(&config.gpio_root, config.button_gpio, config.bounce());
        if let Err(e) = input.export() {
            log::warn!("couldn't export gpio {}: {e}", config.button_gpio);
        }
        button::spawn_input(input, presses.clone())?;
        control = control.with_presses(presses);
    } else {
        log::info!("running without a button");
    }

    Arc::new(control).spawn(listener)?;
    let scheduler = Scheduler::new(store, playback, config.tick_interval()).spawn()?;
    scheduler
        .join()
        .map_err(|_| io::Error::other("scheduler thread panicked"))?;
    Ok(())
}
