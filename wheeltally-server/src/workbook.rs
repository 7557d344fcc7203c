//! Workbook exporter writing the fixed sheet layout, plus the registry of the
//! newest artifact served for download.
use chrono::{DateTime, Local};
use rust_xlsxwriter::{Workbook, XlsxError};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use wheeltally_engine::numbers::count_to_f64;
use wheeltally_engine::{CellRef, Exporter, SheetLayout, TallyView};

const NUMBER_HEADER: &str = "number";
const COLOR_HEADER: &str = "color";
const ARTIFACT_EXTENSION: &str = "xlsx";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("workbook serialization failed: {0}")]
    Workbook(#[from] XlsxError),
    #[error("writing {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("history row {0} does not fit on the sheet")]
    HistoryOverflow(usize),
}

/// Newest exported artifact, shared between exporters and the HTTP server.
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    latest: RwLock<Option<PathBuf>>,
}

impl ArtifactRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with the newest workbook already in `dir`.
    #[must_use]
    pub fn discover(dir: &Path) -> Self {
        let registry = Self::new();
        if let Some(found) = newest_artifact(dir) {
            log::info!("serving existing artifact {}", found.display());
            registry.publish(found);
        }
        registry
    }

    pub fn publish(&self, path: PathBuf) {
        let mut slot = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(path);
    }

    #[must_use]
    pub fn latest(&self) -> Option<PathBuf> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn newest_artifact(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.path().extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// `<prefix>-<session>-<YYYYmmddTHHMMSS>.xlsx`
#[must_use]
pub fn artifact_file_name(prefix: &str, session: &str, started: DateTime<Local>) -> String {
    let ts = started.format("%Y%m%dT%H%M%S");
    format!("{prefix}-{session}-{ts}.{ARTIFACT_EXTENSION}")
}

/// Writes each snapshot to one workbook path, replacing it atomically.
#[derive(Debug)]
pub struct XlsxExporter {
    path: PathBuf,
    sheet_name: String,
    layout: SheetLayout,
    registry: std::sync::Arc<ArtifactRegistry>,
}

impl XlsxExporter {
    #[must_use]
    pub fn new(
        path: PathBuf,
        sheet_name: impl Into<String>,
        registry: std::sync::Arc<ArtifactRegistry>,
    ) -> Self {
        Self {
            path,
            sheet_name: sheet_name.into(),
            layout: SheetLayout::standard(),
            registry,
        }
    }

    /// Render the sheet for one snapshot into xlsx bytes.
    pub fn render(&self, snapshot: &TallyView) -> Result<Vec<u8>, ExportError> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(&self.sheet_name)?;

        if let Some((number, color)) = SheetLayout::history_cells(0) {
            let (row, col) = header_cell(number);
            sheet.write_string(row, col, NUMBER_HEADER)?;
            let (row, col) = header_cell(color);
            sheet.write_string(row, col, COLOR_HEADER)?;
        }

        for (index, entry) in snapshot.history().iter().enumerate() {
            let (number, color) =
                SheetLayout::history_cells(index).ok_or(ExportError::HistoryOverflow(index))?;
            let (row, col) = number.zero_based();
            sheet.write_number(row, col, f64::from(entry.outcome.number()))?;
            let (row, col) = color.zero_based();
            sheet.write_string(row, col, entry.color.label())?;
        }

        for (at, value) in self.layout.values(snapshot) {
            let (row, col) = at.zero_based();
            sheet.write_number(row, col, count_to_f64(value))?;
        }

        Ok(workbook.save_to_buffer()?)
    }
}

fn header_cell(first_history_cell: CellRef) -> (u32, u16) {
    let (row, col) = first_history_cell.zero_based();
    (row.saturating_sub(1), col)
}

impl Exporter for XlsxExporter {
    type Error = ExportError;

    fn export(&self, snapshot: &TallyView) -> Result<(), Self::Error> {
        let bytes = self.render(snapshot)?;
        write_atomically(&self.path, &bytes)?;
        self.registry.publish(self.path.clone());
        log::debug!(
            "exported {} outcomes to {}",
            snapshot.total(),
            self.path.display()
        );
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let partial = path.with_extension(format!("{ARTIFACT_EXTENSION}.partial"));
    let mut file = File::create(&partial).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&partial, path).map_err(|source| {
        let _ = fs::remove_file(&partial);
        io_err(source)
    })
}
