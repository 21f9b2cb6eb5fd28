//! In-memory 4x20 character frame buffer standing in for the HD44780
//! panel. The control loop renders into it and the web surface snapshots
//! the lines for the status page.

use log::debug;
use std::sync::RwLock;

pub const ROWS: usize = 4;
pub const COLS: usize = 20;

pub struct Display {
    rows: RwLock<[[char; COLS]; ROWS]>,
}

impl Default for Display {
    fn default() -> Self {
        Display::new()
    }
}

impl Display {
    pub fn new() -> Display {
        Display {
            rows: RwLock::new([[' '; COLS]; ROWS]),
        }
    }

    /// Write `text` starting at `(row, col)`. Out-of-range rows are
    /// ignored, overlong text is clipped at the panel edge.
    pub fn print(&self, row: usize, col: usize, text: &str) {
        if row >= ROWS {
            return;
        }
        debug!("lcd[{row},{col}] {text}");
        let mut rows = self.rows.write().unwrap();
        for (offset, ch) in text.chars().enumerate() {
            let Some(cell) = rows[row].get_mut(col + offset) else {
                break;
            };
            *cell = ch;
        }
    }

    pub fn print_char(&self, row: usize, col: usize, ch: char) {
        if row >= ROWS || col >= COLS {
            return;
        }
        self.rows.write().unwrap()[row][col] = ch;
    }

    pub fn lines(&self) -> Vec<String> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .map(|row| row.iter().collect::<String>().trim_end().to_string())
            .collect()
    }
}
