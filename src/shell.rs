//! Line-oriented command shell
//!
//! The shell is the operator's way into the registry. Every command is one
//! line with its arguments inline; nothing prompts. Each command takes the
//! registry lock for one short operation, and slow work (reading capture
//! files, writing run documents) happens before or after the lock.
//!
//! Stdin is read on its own thread and fed to the shell over a channel, so
//! the shell can wait on operator input and engine events at the same time
//! and stop promptly when the link fails.
//!
//! # Commands
//!
//! | Command | Effect |
//! |---------|--------|
//! | `new <file> <ports> <type> <bits> [overread] [dpcm] [window_ms] [dummy]` | create a run |
//! | `load <file>` | load a saved run |
//! | `save [run] <file>` | save a run |
//! | `list` | show active runs |
//! | `select <run>` | choose the default run |
//! | `remove [run]` | remove a run |
//! | `reset [run\|all]` | rewind a run (or all runs) to frame 0 |
//! | `dummy [run] <count>` | set the dummy frame count |
//! | `transition <frame> <dpcm> <window_ms> [reset]` | schedule a transition |
//! | `untransition <n>` | drop the n-th transition |
//! | `blank <offset>` | insert one blank frame |
//! | `header <everdrive\|sd2snes\|none>` | set the flash-cart header |
//! | `on` / `off` | release / hold the console reset line |
//! | `restart` | off, reset the run, on |
//! | `stats` | link counters |
//! | `help` / `exit` | |

use crate::backend::{EngineEvent, EngineHandle};
use crate::config::RunDocument;
use crate::error::{Result, TasLinkError};
use crate::session::{PreparedRun, Registration, RunConfig, SessionRegistry};
use crate::types::{ControllerType, ControllerWidth, EventWindow, FlashCartHeader, Transition};
use crossbeam_channel::{select, unbounded};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::MutexGuard;

/// Arguments of the `new` command
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunArgs {
    pub input_file: PathBuf,
    pub ports: Vec<u8>,
    pub controller_type: ControllerType,
    pub width: ControllerWidth,
    pub overread: bool,
    pub dpcm_fix: bool,
    pub window: EventWindow,
    pub dummy_frames: usize,
}

impl NewRunArgs {
    /// Run configuration for these arguments
    pub fn into_config(self) -> RunConfig {
        RunConfig {
            ports: self.ports,
            controller_type: self.controller_type,
            width: self.width,
            overread: self.overread,
            window: self.window,
            input_file: self.input_file,
            dpcm_fix: self.dpcm_fix,
            dummy_frames: self.dummy_frames,
            blank_frames: Vec::new(),
            header: None,
            transitions: Vec::new(),
        }
    }
}

/// Which runs a reset applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    /// One run, or the selected run
    Run(Option<usize>),
    /// Every run, with a global clear
    All,
}

/// A parsed shell command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    New(NewRunArgs),
    Load(PathBuf),
    Save { run: Option<usize>, path: PathBuf },
    List,
    Select(usize),
    Remove(Option<usize>),
    Reset(ResetTarget),
    Dummy { run: Option<usize>, count: usize },
    Transition(Transition),
    RemoveTransition(usize),
    Blank(usize),
    Header(Option<FlashCartHeader>),
    On,
    Off,
    Restart,
    Stats,
    Help,
    Exit,
}

fn usage(text: &str) -> TasLinkError {
    TasLinkError::Configuration(format!("usage: {}", text))
}

fn parse_number<T: std::str::FromStr>(arg: &str, what: &str) -> Result<T> {
    arg.parse()
        .map_err(|_| TasLinkError::Configuration(format!("'{}' is not a valid {}", arg, what)))
}

fn parse_flag(arg: &str) -> Result<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "y" | "yes" | "1" | "on" | "true" => Ok(true),
        "n" | "no" | "0" | "off" | "false" => Ok(false),
        other => Err(TasLinkError::Configuration(format!(
            "'{}' is not y/n",
            other
        ))),
    }
}

fn parse_ports(arg: &str) -> Result<Vec<u8>> {
    arg.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| parse_number(s.trim(), "port"))
        .collect()
}

fn parse_window(arg: &str) -> Result<EventWindow> {
    EventWindow::from_millis(parse_number(arg, "window")?)
}

impl Command {
    /// Parse one input line; blank lines and `#` comments parse to `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match (name.as_str(), args.as_slice()) {
            ("new", [file, ports, kind, bits, rest @ ..]) if rest.len() <= 4 => {
                Command::New(NewRunArgs {
                    input_file: PathBuf::from(file),
                    ports: parse_ports(ports)?,
                    controller_type: kind.parse()?,
                    width: ControllerWidth::try_from(parse_number::<u32>(bits, "bit width")?)?,
                    overread: rest.first().map(|a| parse_flag(a)).transpose()?.unwrap_or(false),
                    dpcm_fix: rest.get(1).map(|a| parse_flag(a)).transpose()?.unwrap_or(false),
                    window: rest
                        .get(2)
                        .map(|a| parse_window(a))
                        .transpose()?
                        .unwrap_or(EventWindow::NONE),
                    dummy_frames: rest
                        .get(3)
                        .map(|a| parse_number(a, "frame count"))
                        .transpose()?
                        .unwrap_or(0),
                })
            }
            ("new", _) => {
                return Err(usage(
                    "new <file> <ports> <type> <bits> [overread y|n] [dpcm y|n] [window_ms] [dummy]",
                ))
            }
            ("load", [file]) => Command::Load(PathBuf::from(file)),
            ("load", _) => return Err(usage("load <file>")),
            ("save", [file]) => Command::Save {
                run: None,
                path: PathBuf::from(file),
            },
            ("save", [run, file]) => Command::Save {
                run: Some(parse_number(run, "run number")?),
                path: PathBuf::from(file),
            },
            ("save", _) => return Err(usage("save [run] <file>")),
            ("list", []) => Command::List,
            ("select", [run]) => Command::Select(parse_number(run, "run number")?),
            ("select", _) => return Err(usage("select <run>")),
            ("remove", []) => Command::Remove(None),
            ("remove", [run]) => Command::Remove(Some(parse_number(run, "run number")?)),
            ("reset", []) => Command::Reset(ResetTarget::Run(None)),
            ("reset", [all]) if all.eq_ignore_ascii_case("all") => Command::Reset(ResetTarget::All),
            ("reset", [run]) => {
                Command::Reset(ResetTarget::Run(Some(parse_number(run, "run number")?)))
            }
            ("dummy", [count]) => Command::Dummy {
                run: None,
                count: parse_number(count, "frame count")?,
            },
            ("dummy", [run, count]) => Command::Dummy {
                run: Some(parse_number(run, "run number")?),
                count: parse_number(count, "frame count")?,
            },
            ("dummy", _) => return Err(usage("dummy [run] <count>")),
            ("transition", [frame, dpcm, window, rest @ ..]) if rest.len() <= 1 => {
                let transition = Transition::new(
                    parse_number(frame, "frame")?,
                    parse_flag(dpcm)?,
                    parse_window(window)?,
                );
                let reset = match rest {
                    [flag] => flag.eq_ignore_ascii_case("reset") || parse_flag(flag)?,
                    _ => false,
                };
                Command::Transition(if reset {
                    transition.with_reset()
                } else {
                    transition
                })
            }
            ("transition", _) => {
                return Err(usage("transition <frame> <dpcm y|n> <window_ms> [reset]"))
            }
            ("untransition", [n]) => Command::RemoveTransition(parse_number(n, "transition number")?),
            ("untransition", _) => return Err(usage("untransition <n>")),
            ("blank", [offset]) => Command::Blank(parse_number(offset, "frame")?),
            ("blank", _) => return Err(usage("blank <offset>")),
            ("header", [kind]) if kind.eq_ignore_ascii_case("none") => Command::Header(None),
            ("header", [kind]) => Command::Header(Some(kind.parse()?)),
            ("header", _) => return Err(usage("header <everdrive|sd2snes|none>")),
            ("on", []) => Command::On,
            ("off", []) => Command::Off,
            ("restart", []) => Command::Restart,
            ("stats", []) => Command::Stats,
            ("help", _) | ("?", _) => Command::Help,
            ("exit", []) | ("quit", []) => Command::Exit,
            (other, _) => {
                return Err(TasLinkError::Configuration(format!(
                    "unknown command '{}' (try 'help')",
                    other
                )))
            }
        };
        Ok(Some(command))
    }
}

/// Whether the shell keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

const HELP: &str = "\
new <file> <ports> <type> <bits> [overread y|n] [dpcm y|n] [window_ms] [dummy]
    create a run; ports like 1,2; type normal|y|multitap|four-score
load <file>             load a saved run
save [run] <file>       save a run
list                    show active runs
select <run>            make a run the default target
remove [run]            remove a run
reset [run|all]         rewind to frame 0
dummy [run] <count>     set the number of dummy frames
transition <frame> <dpcm y|n> <window_ms> [reset]
untransition <n>        drop a scheduled transition
blank <offset>          insert one blank frame
header <everdrive|sd2snes|none>
on | off | restart      console reset line
stats                   link counters
exit";

/// The operator shell
pub struct Shell<W: Write> {
    handle: EngineHandle,
    out: W,
}

impl<W: Write> Shell<W> {
    /// Create a shell writing replies to `out`
    pub fn new(handle: EngineHandle, out: W) -> Self {
        Self { handle, out }
    }

    /// Reply sink, for tests
    pub fn output(&self) -> &W {
        &self.out
    }

    fn registry(&self) -> Result<MutexGuard<'_, SessionRegistry>> {
        self.handle
            .registry()
            .lock()
            .map_err(|_| TasLinkError::Channel("session registry lock poisoned".to_string()))
    }

    fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        writeln!(self.out, "{}", text.as_ref())?;
        Ok(())
    }

    /// Parse and run one line
    pub fn execute_line(&mut self, line: &str) -> Result<Flow> {
        match Command::parse(line)? {
            Some(command) => self.execute(command),
            None => Ok(Flow::Continue),
        }
    }

    /// Run one command
    pub fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::New(args) => {
                let prepared = PreparedRun::encode(args.into_config())?;
                let frames = prepared.buffer.len();
                let registration = self.registry()?.create_run(prepared)?;
                let number = self.registry()?.len();
                self.say(format!(
                    "Run #{} created ({}, {} frames)",
                    number, registration.id, frames
                ))?;
                self.report_registration(&registration)?;
            }
            Command::Load(path) => {
                let loaded = RunDocument::load_config(&path)?;
                let needs_resave = loaded.needs_resave();
                let prepared = PreparedRun::encode(loaded.config)?.with_resave(needs_resave);
                let registration = self.registry()?.register(prepared)?;
                let number = self.registry()?.len();
                self.say(format!(
                    "Run #{} loaded from {:?} ({})",
                    number, path, registration.id
                ))?;
                self.report_registration(&registration)?;
                if needs_resave {
                    self.say("Defaults were applied; save the run to keep them")?;
                }
            }
            Command::Save { run, path } => {
                let (id, config) = self.registry()?.config_snapshot(run)?;
                RunDocument::from_config(&config).save(&path)?;
                self.registry()?.mark_saved(id);
                self.say(format!("Saved {} to {:?}", id, path))?;
            }
            Command::List => self.list()?,
            Command::Select(number) => {
                let id = self.registry()?.select(number)?;
                self.say(format!("Run #{} ({}) selected", number, id))?;
            }
            Command::Remove(run) => {
                let id = self.registry()?.remove_run(run)?;
                self.say(format!("{} removed", id))?;
            }
            Command::Reset(ResetTarget::All) => {
                self.registry()?.reset_all()?;
                self.say("All runs reset")?;
            }
            Command::Reset(ResetTarget::Run(run)) => {
                let id = self.registry()?.reset_run(run)?;
                self.say(format!("{} reset", id))?;
            }
            Command::Dummy { run, count } => {
                let previous = self.registry()?.modify_dummy_frames(run, count)?;
                self.say(format!("Dummy frames {} -> {}", previous, count))?;
            }
            Command::Transition(transition) => {
                self.registry()?.add_transition(None, transition)?;
                self.say(format!(
                    "Transition at frame {}: dpcm {}, window {}{}",
                    transition.frame,
                    if transition.dpcm_fix { "on" } else { "off" },
                    transition.window,
                    if transition.reset { ", reset" } else { "" }
                ))?;
            }
            Command::RemoveTransition(position) => {
                let removed = self.registry()?.remove_transition(None, position)?;
                self.say(format!("Transition at frame {} removed", removed.frame))?;
            }
            Command::Blank(offset) => {
                self.registry()?.add_blank_frame(None, offset)?;
                self.say(format!("Blank frame inserted at {}", offset))?;
            }
            Command::Header(header) => {
                self.registry()?.set_header(None, header)?;
                match header {
                    Some(h) => self.say(format!("{} header set", h))?,
                    None => self.say("Header removed")?,
                }
            }
            Command::On => self.registry()?.console_power(true)?,
            Command::Off => self.registry()?.console_power(false)?,
            Command::Restart => {
                let id = self.registry()?.restart_console(None)?;
                self.say(format!("Console restarted, {} rewound", id))?;
            }
            Command::Stats => {
                let (name, stats) = {
                    let registry = self.registry()?;
                    (registry.link_name(), registry.stats())
                };
                self.say(format!("{}: {}", name, stats))?;
            }
            Command::Help => self.say(HELP)?,
            Command::Exit => {
                let unsaved = self.registry()?.unsaved_runs();
                if !unsaved.is_empty() {
                    let list: Vec<String> = unsaved.iter().map(|n| format!("#{}", n)).collect();
                    self.say(format!("Warning: unsaved changes in run {}", list.join(", ")))?;
                }
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// A run short enough to fit in the prebuffer is already finished
    fn report_registration(&mut self, registration: &Registration) -> Result<()> {
        if registration.finished {
            self.report_event(&EngineEvent::RunFinished {
                id: registration.id,
            })?;
        }
        Ok(())
    }

    fn list(&mut self) -> Result<()> {
        let runs = self.registry()?.list();
        if runs.is_empty() {
            return self.say("No active runs");
        }
        for run in runs {
            let ports: Vec<String> = run.config.ports.iter().map(|p| p.to_string()).collect();
            self.say(format!(
                "{}#{} [{}] ports {} {} {}-bit {:?} frame {}/{} {}{}",
                if run.selected { ">" } else { " " },
                run.number,
                run.mask,
                ports.join(","),
                run.config.controller_type,
                run.config.width.bits(),
                run.config.input_file,
                run.cursor,
                run.frames,
                run.state,
                if run.modified { " *" } else { "" }
            ))?;
        }
        Ok(())
    }

    /// Tell the operator about an engine event
    ///
    /// A link failure is returned as an error so the caller shuts down.
    pub fn report_event(&mut self, event: &EngineEvent) -> Result<Flow> {
        match event {
            EngineEvent::RunFinished { id } => self.say(format!("{} finished", id))?,
            EngineEvent::LatchBurst { port, count } => {
                self.say(format!("Warning: {} latches on port {} in one read", count, port))?
            }
            EngineEvent::TransitionApplied { id, transition } => {
                self.say(format!("{} transition at frame {}", id, transition.frame))?
            }
            EngineEvent::LinkFailed(reason) => {
                return Err(TasLinkError::LinkFailure(reason.clone()));
            }
            EngineEvent::Stopped => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    /// Serve commands from `input` until `exit`, end of input, or link failure
    pub fn run<R>(mut self, input: R) -> Result<()>
    where
        R: BufRead + Send + 'static,
    {
        let (line_tx, line_rx) = unbounded::<String>();
        std::thread::Builder::new()
            .name("shell-input".to_string())
            .spawn(move || {
                for line in input.lines() {
                    match line {
                        Ok(line) => {
                            if line_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Failed to read command input: {}", e);
                            break;
                        }
                    }
                }
            })?;

        let events = self.handle.events().clone();
        loop {
            select! {
                recv(line_rx) -> line => {
                    let Ok(line) = line else {
                        tracing::info!("Command input closed");
                        break;
                    };
                    match self.execute_line(&line) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit) => break,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => self.say(format!("ERROR: {}", e))?,
                    }
                }
                recv(events) -> event => {
                    let Ok(event) = event else { break };
                    if self.report_event(&event)? == Flow::Exit {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_new() {
        let cmd = Command::parse("new smb.r08 1,2 normal 8 n y 1.5 4").unwrap().unwrap();
        let Command::New(args) = cmd else {
            panic!("expected new");
        };
        assert_eq!(args.ports, vec![1, 2]);
        assert_eq!(args.controller_type, ControllerType::Normal);
        assert_eq!(args.width, ControllerWidth::Bits8);
        assert!(!args.overread);
        assert!(args.dpcm_fix);
        assert_eq!(args.window.quarters(), 6);
        assert_eq!(args.dummy_frames, 4);

        let Some(Command::New(args)) = Command::parse("new a.r16m 1 multitap 16").unwrap() else {
            panic!("expected new");
        };
        assert_eq!(args.window, EventWindow::NONE);
        assert_eq!(args.dummy_frames, 0);
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        assert!(Command::parse("new smb.r08 1 normal 12").is_err());
        assert!(Command::parse("new smb.r08 1 gamepad 8").is_err());
        assert!(Command::parse("new smb.r08").is_err());
        assert!(Command::parse("transition 10 maybe 0").is_err());
        assert!(Command::parse("transition 10 y 99").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn test_parse_run_commands() {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("# comment").unwrap(), None);
        assert_eq!(
            Command::parse("reset all").unwrap(),
            Some(Command::Reset(ResetTarget::All))
        );
        assert_eq!(
            Command::parse("reset 2").unwrap(),
            Some(Command::Reset(ResetTarget::Run(Some(2))))
        );
        assert_eq!(
            Command::parse("save 2 out.toml").unwrap(),
            Some(Command::Save {
                run: Some(2),
                path: PathBuf::from("out.toml")
            })
        );
        assert_eq!(
            Command::parse("dummy 12").unwrap(),
            Some(Command::Dummy { run: None, count: 12 })
        );
        assert_eq!(Command::parse("header none").unwrap(), Some(Command::Header(None)));
        assert_eq!(
            Command::parse("header SD2SNES").unwrap(),
            Some(Command::Header(Some(FlashCartHeader::Sd2Snes)))
        );
        assert_eq!(Command::parse("EXIT").unwrap(), Some(Command::Exit));
    }

    #[test]
    fn test_parse_transition() {
        let Some(Command::Transition(t)) = Command::parse("transition 300 y 2 reset").unwrap()
        else {
            panic!("expected transition");
        };
        assert_eq!(t.frame, 300);
        assert!(t.dpcm_fix);
        assert_eq!(t.window.quarters(), 8);
        assert!(t.reset);

        let Some(Command::Transition(t)) = Command::parse("transition 1 n 0").unwrap() else {
            panic!("expected transition");
        };
        assert!(!t.reset);
    }
}
