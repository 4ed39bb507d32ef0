use crate::acquisition::{run_pha, CycleStats, PhaSettings};
use crate::detector::Detector;
use crate::transport::Transport;
use crate::utils::CountRate;
use crate::writer::SpectrumWriter;
use anyhow::{anyhow, Result};
use crossbeam_channel::{tick, unbounded, Receiver, TryRecvError};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget},
    DefaultTerminal, Frame,
};
use std::{
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

#[derive(Debug)]
pub struct LiveView {
    pub counter: CountRate,
    pub t_begin: Instant,
    pub serial: u32,
    pub settings: PhaSettings,
    pub last: Option<CycleStats>,
    pub exit: Option<ViewExit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewExit {
    Quit,
    Finished,
}

impl LiveView {
    pub fn new(serial: u32, settings: PhaSettings) -> Self {
        Self {
            counter: CountRate::new(),
            t_begin: Instant::now(),
            serial,
            settings,
            last: None,
            exit: None,
        }
    }

    /// Runs the PHA loop on a worker thread and redraws until it finishes,
    /// `q` or Ctrl-C is pressed, or `interrupt` is raised. The detector is
    /// handed back once the worker stopped it.
    pub fn run<T, W>(
        &mut self,
        terminal: &mut DefaultTerminal,
        mut det: Detector<T>,
        mut writer: SpectrumWriter<W>,
        interrupt: &AtomicBool,
    ) -> Result<(Detector<T>, usize)>
    where
        T: Transport + Send + 'static,
        W: Write + Send + 'static,
    {
        let ticker = tick(Duration::from_millis(250));
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx_stats, rx_stats) = unbounded();

        let settings = self.settings;
        let worker_cancel = Arc::clone(&cancel);
        let worker = thread::spawn(move || {
            let done = run_pha(&mut det, &settings, &mut writer, &worker_cancel, |stats| {
                let _ = tx_stats.send(*stats);
            });
            (det, done)
        });

        self.t_begin = Instant::now();
        self.counter.reset();
        self.exit = None;
        while self.exit.is_none() {
            let _ = ticker.recv();
            self.drain(&rx_stats);
            self.check_interrupt(interrupt);
            self.handle_events()?;
            terminal.draw(|f| self.draw(f))?;
        }

        if self.exit == Some(ViewExit::Quit) {
            cancel.store(true, Ordering::SeqCst);
        }
        let (det, done) = worker
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))?;
        Ok((det, done?))
    }

    fn drain(&mut self, rx: &Receiver<CycleStats>) {
        loop {
            match rx.try_recv() {
                Ok(stats) => {
                    self.counter.increment(stats.new_counts);
                    self.last = Some(stats);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.exit.get_or_insert(ViewExit::Finished);
                    break;
                }
            }
        }
    }

    fn check_interrupt(&mut self, interrupt: &AtomicBool) {
        if interrupt.load(Ordering::SeqCst) {
            self.exit.get_or_insert(ViewExit::Quit);
        }
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        if event::poll(Duration::ZERO)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    self.handle_key_event(key_event)
                }
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Char('q') => self.exit = Some(ViewExit::Quit),
            KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.exit = Some(ViewExit::Quit)
            }
            _ => {}
        }
    }
}

impl Widget for &LiveView {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(format!(" digiBASE {} PHA run ", self.serial).bold());
        let instructions = Line::from(vec![" Quit ".into(), "<Q> ".blue().bold()]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let cycle = self.last.map_or(0, |s| s.index + 1);
        let mut lines = vec![Line::from(vec![
            "Elapsed time: ".into(),
            self.t_begin.elapsed().as_secs().to_string().yellow(),
            " s".into(),
            " Cycle: ".into(),
            format!("{cycle}/{}", self.settings.cycles).yellow(),
            " Counts: ".into(),
            self.counter.total.to_string().yellow(),
            " Count rate: ".into(),
            format!("{:.1}", self.counter.rate()).yellow(),
            " cps (avg ".into(),
            format!("{:.1}", self.counter.average_rate()).yellow(),
            ")".into(),
        ])];
        if let Some(status) = self.last.map(|s| s.status) {
            lines.push(Line::from(vec![
                "HV: ".into(),
                format!("{:.2} V", status.hv_volts()).yellow(),
                if status.is_hv_on() { " (on)".green() } else { " (off)".red() },
                " Running: ".into(),
                if status.is_running() { "yes".green() } else { "no".red() },
                " Live time: ".into(),
                format!("{:.2} s", status.live_time_s()).yellow(),
                " Real time: ".into(),
                format!("{:.2} s", status.real_time_s()).yellow(),
            ]));
        }

        Paragraph::new(Text::from(lines))
            .centered()
            .block(block)
            .render(area, buf);
    }
}
