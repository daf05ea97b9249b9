//! CSV reports. Each report type gets its own file, registered with `add_report`, and rows
//! are appended with `send_report`.

use std::any::TypeId;
use std::cell::RefCell;
use std::ffi::OsStr;
use std::fs::{create_dir_all, File};
use std::path::Path;

use csv::Writer;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::define_data_plugin;
use crate::error::SimError;
use crate::HashMap;

pub trait Report: 'static {
    // Returns report type
    fn type_id(&self) -> TypeId;
    // Serializes the data with the correct writer
    fn serialize(&self, writer: &mut Writer<File>) -> Result<(), SimError>;
}

/// Use this macro to define a unique report type
#[macro_export]
macro_rules! define_report {
    ($name:ident) => {
        impl $crate::report::Report for $name {
            fn type_id(&self) -> std::any::TypeId {
                std::any::TypeId::of::<$name>()
            }

            fn serialize(
                &self,
                writer: &mut csv::Writer<std::fs::File>,
            ) -> Result<(), $crate::error::SimError> {
                writer.serialize(self)?;
                Ok(())
            }
        }
    };
}

/// One row per simulated step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasesReport {
    pub time: f64,
    pub step: usize,
    /// Venue types mixing during the step, joined with `;`.
    pub active_venue_types: String,
    pub new_infections: f64,
    pub total_infected: f64,
}

define_report!(CasesReport);

struct ReportData {
    file_writers: RefCell<HashMap<TypeId, Writer<File>>>,
}

define_data_plugin!(
    ReportPlugin,
    ReportData,
    ReportData {
        file_writers: RefCell::new(HashMap::default()),
    }
);

// Creates the file and any missing parent directories. Only `.csv` paths are accepted.
fn create_report_file(path: &Path) -> Result<File, SimError> {
    match path.extension().and_then(OsStr::to_str) {
        Some("csv") => {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            Ok(File::create(path)?)
        }
        _ => Err(SimError::ReportError(
            "Report output files must be CSVs".to_string(),
        )),
    }
}

pub trait ContextReportExt {
    /// Opens `path` as the output of report type `T`, replacing any earlier writer.
    ///
    /// # Errors
    ///
    /// `ReportError` if `path` is not a `.csv` file, `IoError` if it cannot be created.
    fn add_report<T: Report + 'static>(&mut self, path: &Path) -> Result<(), SimError>;

    /// Appends `report` as a row of its report file and flushes it.
    ///
    /// # Errors
    ///
    /// `ReportError` if no file was registered for the report type.
    fn send_report<T: Report>(&self, report: T) -> Result<(), SimError>;

    /// Whether `add_report` has registered a file for `T`.
    fn has_report<T: Report + 'static>(&self) -> bool;
}

impl ContextReportExt for Context {
    fn add_report<T: Report + 'static>(&mut self, path: &Path) -> Result<(), SimError> {
        let file = create_report_file(path)?;
        trace!("writing report to {}", path.display());

        let data_container = self.get_data_container_mut(ReportPlugin);
        let mut file_writers = data_container.file_writers.borrow_mut();
        file_writers.insert(TypeId::of::<T>(), Writer::from_writer(file));
        Ok(())
    }

    fn send_report<T: Report>(&self, report: T) -> Result<(), SimError> {
        let missing = || SimError::ReportError("No writer found for the report type".to_string());
        // No data container will exist if no reports have been added
        let data_container = self.get_data_container(ReportPlugin).ok_or_else(missing)?;
        let mut file_writers = data_container.file_writers.borrow_mut();
        let writer = file_writers.get_mut(&report.type_id()).ok_or_else(missing)?;
        report.serialize(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn has_report<T: Report + 'static>(&self) -> bool {
        self.get_data_container(ReportPlugin)
            .is_some_and(|data| data.file_writers.borrow().contains_key(&TypeId::of::<T>()))
    }
}
