//! Builtin programs
//!
//! A handful of small programs the binary can start, each a hand-written
//! state machine driven by `Program::resume`. `ProgramRegistry` resolves
//! names to them and is the loader the binary hands to the scheduler.

use std::time::Duration;

use anyhow::bail;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};

use crate::core::event::{Event, EventKind, TimerId};
use crate::core::host::{HostServices, LoadError, ProgramLoader};
use crate::core::task::{Program, Step, TaskContext, Wake};
use crate::core::term::{Color, VirtualTerminal};

type Constructor = fn(&[String], &HostServices) -> anyhow::Result<Box<dyn Program>>;

/// Name to constructor table
pub struct ProgramRegistry {
    entries: Vec<(String, Constructor)>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry with every builtin program
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("menu", |_, services| Ok(Box::new(Menu::new(services))));
        registry.register("hello", |_, _| Ok(Box::new(Hello)));
        registry.register("echo", |args, _| Ok(Box::new(Echo::new(args))));
        registry.register("clock", |_, _| Ok(Box::new(Clock)));
        registry.register("ps", |_, _| Ok(Box::new(Ps::default())));
        registry.register("crash", |args, _| Crash::new(args).map(|c| Box::new(c) as Box<dyn Program>));
        registry
    }

    /// Add or replace a program
    pub fn register(&mut self, name: &str, constructor: Constructor) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = constructor,
            None => self.entries.push((name.to_string(), constructor)),
        }
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProgramLoader for ProgramRegistry {
    fn load(
        &self,
        identifier: &str,
        args: &[String],
        services: &HostServices,
    ) -> Result<Box<dyn Program>, LoadError> {
        let (_, constructor) = self
            .entries
            .iter()
            .find(|(name, _)| name == identifier)
            .ok_or_else(|| LoadError::NotFound(identifier.to_string()))?;
        constructor(args, services).map_err(|source| LoadError::Init {
            name: identifier.to_string(),
            source,
        })
    }

    fn catalogue(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// A key press (not a release) from the wake-up, if any
fn key_press(wake: &Wake) -> Option<&KeyEvent> {
    match wake.event() {
        Some(Event::Key(key)) if key.kind != KeyEventKind::Release => Some(key),
        _ => None,
    }
}

fn print_line(vt: &mut VirtualTerminal, color: Color, text: &str) {
    vt.set_text_color(color);
    vt.print(text);
    vt.newline();
    vt.set_text_color(VirtualTerminal::DEFAULT_TEXT);
}

/// Lists the catalogue; a digit starts the matching program
pub struct Menu {
    entries: Vec<String>,
}

impl Menu {
    pub fn new(services: &HostServices) -> Self {
        Self {
            entries: services.catalogue.iter().take(9).cloned().collect(),
        }
    }

    fn draw(&self, vt: &mut VirtualTerminal) {
        vt.clear();
        vt.set_text_color(Color::BrightWhite);
        vt.write("Programs");
        vt.set_text_color(VirtualTerminal::DEFAULT_TEXT);
        for (i, name) in self.entries.iter().enumerate() {
            vt.set_cursor_pos(1, i as i32 + 2);
            vt.write(&format!("  {}. {}", i + 1, name));
        }
        self.message(vt, Color::BrightBlack, "Press a number to start a program.", 2);
    }

    /// Write `text` on its own row, `offset` rows below the list
    fn message(&self, vt: &mut VirtualTerminal, color: Color, text: &str, offset: usize) {
        vt.set_cursor_pos(1, (self.entries.len() + offset) as i32);
        vt.clear_line();
        vt.set_text_color(color);
        vt.write(text);
        vt.set_text_color(VirtualTerminal::DEFAULT_TEXT);
    }
}

impl Program for Menu {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step> {
        if let Wake::Start = wake {
            self.draw(ctx.vt());
        }

        let choice = key_press(&wake).and_then(|key| match key.code {
            KeyCode::Char(c) => c.to_digit(10),
            _ => None,
        });
        if let Some(name) = choice
            .filter(|&d| d >= 1)
            .and_then(|d| self.entries.get(d as usize - 1))
            .cloned()
        {
            let (color, text) = match ctx.spawn(&name, &[]) {
                Ok(id) => (Color::Green, format!("Started {} as {}", name, id)),
                Err(e) => (Color::Red, e.to_string()),
            };
            self.message(ctx.vt(), color, &text, 3);
        }

        Ok(ctx.await_event(Some(EventKind::Key)))
    }
}

/// Greets, then exits on any key
pub struct Hello;

impl Program for Hello {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step> {
        if key_press(&wake).is_some() {
            return Ok(Step::Done);
        }
        if let Wake::Start = wake {
            let greeting = format!("Hello from {} {}!", ctx.name(), ctx.id());
            print_line(ctx.vt(), Color::BrightGreen, &greeting);
            print_line(ctx.vt(), Color::BrightBlack, "Press any key to exit.");
        }
        Ok(ctx.await_event(Some(EventKind::Key)))
    }
}

/// Prints its arguments, then echoes typed text until Esc
pub struct Echo {
    greeting: String,
}

impl Echo {
    pub fn new(args: &[String]) -> Self {
        Self {
            greeting: args.join(" "),
        }
    }
}

impl Program for Echo {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step> {
        let vt = ctx.vt();
        if let Wake::Start = wake {
            vt.set_cursor_blink(true);
            if !self.greeting.is_empty() {
                vt.print(&self.greeting);
                vt.newline();
            }
        }

        if let Some(key) = key_press(&wake) {
            match key.code {
                KeyCode::Esc => return Ok(Step::Done),
                KeyCode::Enter => vt.newline(),
                KeyCode::Backspace => {
                    let (x, y) = vt.cursor_pos();
                    if x > 1 {
                        vt.set_cursor_pos(x as i32 - 1, y as i32);
                        vt.write(" ");
                        vt.set_cursor_pos(x as i32 - 1, y as i32);
                    }
                }
                KeyCode::Char(c) => {
                    vt.print(&c.to_string());
                }
                _ => {}
            }
        }

        Ok(ctx.await_event(Some(EventKind::Key)))
    }
}

/// Session uptime, redrawn every second
pub struct Clock;

impl Program for Clock {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, _wake: Wake) -> anyhow::Result<Step> {
        let secs = ctx.now().as_secs();
        let vt = ctx.vt();
        vt.set_cursor_pos(1, 1);
        vt.clear_line();
        vt.write(&format!(
            "Uptime {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        ));
        Ok(ctx.sleep(Duration::from_secs(1)))
    }
}

/// Live task list; `q` quits
#[derive(Default)]
pub struct Ps {
    refresh: Option<TimerId>,
}

impl Ps {
    const INTERVAL: Duration = Duration::from_secs(1);

    fn draw(ctx: &mut TaskContext<'_>) {
        let session = ctx.session().clone();
        let vt = ctx.vt();
        vt.clear();
        print_line(vt, Color::BrightWhite, &format!("  {:<6}{:<16}{}", "ID", "STATE", "NAME"));
        for task in &session.tasks {
            let marker = if session.focus == Some(task.id) { '*' } else { ' ' };
            let line = format!("{} {:<6}{:<16}{}", marker, task.id.to_string(), task.state.to_string(), task.name);
            let color = if task.state.is_terminal() {
                Color::Red
            } else {
                VirtualTerminal::DEFAULT_TEXT
            };
            print_line(vt, color, &line);
        }
    }
}

impl Program for Ps {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step> {
        if let Some(key) = key_press(&wake) {
            if key.code == KeyCode::Char('q') {
                return Ok(Step::Done);
            }
        }

        let refresh_due = match (&wake, self.refresh) {
            (Wake::Start, _) => true,
            (Wake::Event(Event::Timer(id)), Some(own)) => *id == own,
            _ => false,
        };
        if refresh_due {
            Self::draw(ctx);
            self.refresh = Some(ctx.start_timer(Self::INTERVAL));
        }

        Ok(ctx.await_event(None))
    }
}

/// Fails on the first key press, by error or by panic (`crash panic`)
pub struct Crash {
    panic: bool,
}

impl Crash {
    pub fn new(args: &[String]) -> anyhow::Result<Self> {
        match args.first().map(String::as_str) {
            None | Some("error") => Ok(Self { panic: false }),
            Some("panic") => Ok(Self { panic: true }),
            Some(other) => bail!("unknown crash mode {:?}", other),
        }
    }
}

impl Program for Crash {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step> {
        if key_press(&wake).is_some() {
            if self.panic {
                panic!("crash requested");
            }
            bail!("crash requested");
        }
        print_line(ctx.vt(), Color::Yellow, "Press any key to crash.");
        Ok(ctx.await_event(Some(EventKind::Key)))
    }
}
