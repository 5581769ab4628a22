//! Operator-facing output
//!
//! The report goes to the console's `out` writer and progress notices to its
//! `err` writer. Tests swap both for an in-memory buffer.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

/// Progress notices emitted while a run is in flight
pub trait Reporter: Send + Sync {
    fn notice(&self, message: &str);
}

/// Yes/no confirmation from the operator
pub trait Prompt: Send + Sync {
    fn confirm(&self, question: &str, default_yes: bool) -> bool;
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// In-memory sink shared between a console and a test
#[derive(Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut inner) => inner.write(buf),
            Err(_) => Err(io::Error::other("capture buffer poisoned")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Console {
    out: SharedWriter,
    err: SharedWriter,
}

impl Console {
    pub fn stdio() -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(io::stdout()))),
            err: Arc::new(Mutex::new(Box::new(io::stderr()))),
        }
    }

    /// A console writing both streams into one buffer
    pub fn capture() -> (Self, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        let console = Self {
            out: Arc::new(Mutex::new(Box::new(buffer.clone()))),
            err: Arc::new(Mutex::new(Box::new(buffer.clone()))),
        };
        (console, buffer)
    }

    /// A console writing stdout and stderr into separate buffers
    pub fn capture_split() -> (Self, CaptureBuffer, CaptureBuffer) {
        let out = CaptureBuffer::default();
        let err = CaptureBuffer::default();
        let console = Self {
            out: Arc::new(Mutex::new(Box::new(out.clone()))),
            err: Arc::new(Mutex::new(Box::new(err.clone()))),
        };
        (console, out, err)
    }

    fn write_to(writer: &SharedWriter, text: &str) {
        if let Ok(mut w) = writer.lock() {
            // Ignore closed pipes
            let _ = w.write_all(text.as_bytes()).and_then(|_| w.flush());
        }
    }

    /// Write a block of report text to stdout
    pub fn print(&self, text: &str) {
        Self::write_to(&self.out, text);
    }

    pub fn line(&self, text: &str) {
        Self::write_to(&self.out, &format!("{text}\n"));
    }

    pub fn error_line(&self, text: &str) {
        Self::write_to(&self.err, &format!("{text}\n"));
    }
}

impl Reporter for Console {
    fn notice(&self, message: &str) {
        self.error_line(message);
    }
}

/// Interactive prompt reading a line from stdin
pub struct StdinPrompt;

impl StdinPrompt {
    fn parse_answer(answer: &str, default_yes: bool) -> bool {
        match answer.trim().to_lowercase().as_str() {
            "" => default_yes,
            "y" | "yes" => true,
            _ => false,
        }
    }
}

impl Prompt for StdinPrompt {
    fn confirm(&self, question: &str, default_yes: bool) -> bool {
        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        print!("{question} {hint}: ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => false,
            Ok(_) => Self::parse_answer(&input, default_yes),
        }
    }
}
