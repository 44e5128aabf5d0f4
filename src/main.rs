use std::{error::Error, path::PathBuf};

use bedside_clock::{
    alarm::Days,
    communication::{Action, Client, ClientMessage, ServerMessage},
    config::{Config, Content, SettingsUpdate},
    daemon,
    store::FileStore,
};
use clap::{command, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config file to use instead of the one in the config dir
    #[clap(long, short)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// run the clock: scheduler, button and control socket
    Daemon,
    /// write the default config, alarms and settings already saved are kept
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// list alarms
    Alarms,
    /// add an alarm at HH:MM
    Add {
        time: String,
        /// days like `mon,wed,fri`, `weekdays` or `weekend`, every day if left out
        #[clap(long, conflicts_with = "mask")]
        days: Option<Days>,
        /// days as a bitmask, bit 0 is monday
        #[clap(long)]
        mask: Option<u32>,
        #[clap(long)]
        disabled: bool,
    },
    Edit {
        id: u64,
        #[clap(long)]
        time: Option<String>,
        #[clap(long, conflicts_with = "mask")]
        days: Option<Days>,
        #[clap(long)]
        mask: Option<u32>,
        #[clap(long, conflicts_with = "disable")]
        enable: bool,
        #[clap(long)]
        disable: bool,
    },
    Remove {
        id: u64,
    },
    /// show the settings
    Settings,
    /// change settings
    Set {
        /// 0 to 100
        #[clap(long)]
        volume: Option<u8>,
        /// stream url played after the alarm
        #[clap(long, conflicts_with = "file")]
        stream: Option<String>,
        /// local file played after the alarm
        #[clap(long)]
        file: Option<PathBuf>,
        /// tone used when the tone dir has no mp3s
        #[clap(long)]
        tone: Option<PathBuf>,
        #[clap(long)]
        tones_dir: Option<PathBuf>,
    },
    TestAlarm,
    TestContent,
    Stop,
    /// act as if the button was pressed
    Press,
    Status,
}

fn mask(days: Option<Days>, mask: Option<u32>) -> Option<u32> {
    days.map(u32::from).or(mask)
}

fn print_reply(reply: ServerMessage) {
    match reply {
        ServerMessage::Alarms(alarms) if alarms.is_empty() => println!("no alarms"),
        ServerMessage::Alarms(alarms) => {
            for alarm in alarms {
                println!("{alarm}");
            }
        }
        ServerMessage::Alarm(alarm) => println!("{alarm}"),
        ServerMessage::Settings(settings) => match toml::to_string_pretty(&settings) {
            Ok(settings) => print!("{settings}"),
            Err(_) => println!("{settings:#?}"),
        },
        ServerMessage::Status(status) => match status.target {
            Some(target) => println!("{}: {target}", status.mode),
            None => println!("{}", status.mode),
        },
        ServerMessage::Ok => {}
        ServerMessage::Error(e) => eprintln!("error: {e}"),
    }
}

fn request(command: Command) -> ClientMessage {
    match command {
        Command::Alarms => ClientMessage::ListAlarms,
        Command::Add {
            time,
            days,
            mask: bits,
            disabled,
        } => ClientMessage::AddAlarm {
            time,
            days: mask(days, bits).unwrap_or_else(|| Days::EVERY_DAY.into()),
            enabled: !disabled,
        },
        Command::Edit {
            id,
            time,
            days,
            mask: bits,
            enable,
            disable,
        } => ClientMessage::EditAlarm {
            id,
            time,
            days: mask(days, bits),
            enabled: (enable || disable).then_some(enable),
        },
        Command::Remove { id } => ClientMessage::RemoveAlarm(id),
        Command::Settings => ClientMessage::GetSettings,
        Command::Set {
            volume,
            stream,
            file,
            tone,
            tones_dir,
        } => ClientMessage::SetSettings(SettingsUpdate {
            volume_percent: volume,
            alarm_tone_path: tone,
            alarm_tones_dir: tones_dir,
            content: stream.map(Content::Stream).or(file.map(Content::File)),
        }),
        Command::TestAlarm => ClientMessage::Control(Action::TestAlarm),
        Command::TestContent => ClientMessage::Control(Action::TestContent),
        Command::Stop => ClientMessage::Control(Action::Stop),
        Command::Press => ClientMessage::Press,
        Command::Status | Command::Daemon | Command::Init { .. } => ClientMessage::Status,
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("bedside_clock").expect("couldn't initialize logger");

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    match args.command {
        Command::Daemon => {
            let config = Config::load_or_default(&config_path)?;
            log::info!("starting with config {}", config_path.display());
            daemon::run(&config)?;
        }
        Command::Init { force } => {
            if force || !config_path.exists() {
                let config = Config::new();
                config.save(&config_path)?;
                let store = FileStore::open(config.state_path()?)?;
                println!("wrote {}", config_path.display());
                println!("alarms and settings kept in {}", store.path().display());
            } else {
                println!("{} already exists, use --force to overwrite", config_path.display());
            }
        }
        command => {
            let config = Config::load_or_default(&config_path)?;
            let mut client = Client::connect(&config.socket_name)?;
            print_reply(client.request(&request(command))?);
        }
    }
    Ok(())
}
