// Result codes and the process-wide last-message cell.
//
// Embedders that expose this crate over a flat interface report one code
// per operation and query the most recent warning or error text
// separately. All mutation of the message cell happens here.

use crate::error::{Error, Outcome, Warning};
use std::sync::Mutex;

/// Flat result code for an operation.
///
/// `Ok` means success with nothing to report. The `Warn*` codes mean the
/// operation completed but the result may need caller attention. The
/// `Error*` codes mean the operation failed and any in-memory state it
/// touched was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultCode {
    Ok = 0,
    WarnBadFilename = 1,
    WarnLoadOrderMismatch = 2,
    WarnInvalidList = 3,
    ErrorInvalidArgs = 10,
    /// Reserved for embedders that report allocation failure themselves;
    /// the library never produces it.
    ErrorNoMemory = 11,
    ErrorFileNotFound = 12,
    ErrorFileReadFailed = 13,
    ErrorFileWriteFailed = 14,
    ErrorFileRenameFailed = 15,
    ErrorFileNotUtf8 = 16,
    ErrorTimestampReadFailed = 17,
    ErrorTimestampWriteFailed = 18,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }

    pub fn is_warning(self) -> bool {
        matches!(
            self,
            ResultCode::WarnBadFilename
                | ResultCode::WarnLoadOrderMismatch
                | ResultCode::WarnInvalidList
        )
    }

    pub fn is_error(self) -> bool {
        !self.is_ok() && !self.is_warning()
    }
}

impl From<&Error> for ResultCode {
    fn from(error: &Error) -> ResultCode {
        match error {
            Error::InvalidArgs(_) => ResultCode::ErrorInvalidArgs,
            Error::FileNotFound(_) => ResultCode::ErrorFileNotFound,
            Error::FileReadFailed { .. } => ResultCode::ErrorFileReadFailed,
            Error::FileWriteFailed { .. } => ResultCode::ErrorFileWriteFailed,
            Error::FileRenameFailed { .. } => ResultCode::ErrorFileRenameFailed,
            Error::FileNotUtf8(_) => ResultCode::ErrorFileNotUtf8,
            Error::TimestampReadFailed { .. } => ResultCode::ErrorTimestampReadFailed,
            Error::TimestampWriteFailed { .. } => ResultCode::ErrorTimestampWriteFailed,
        }
    }
}

impl From<&Warning> for ResultCode {
    fn from(warning: &Warning) -> ResultCode {
        match warning {
            Warning::InvalidList(_) => ResultCode::WarnInvalidList,
            Warning::LoadOrderMismatch(_) => ResultCode::WarnLoadOrderMismatch,
            Warning::BadFilename(_) => ResultCode::WarnBadFilename,
        }
    }
}

static LAST_MESSAGE: Mutex<Option<String>> = Mutex::new(None);

/// Translate an operation result into a code, recording the message of
/// any warning or error as the process-wide last message.
pub fn capture<T>(result: &Result<Outcome<T>, Error>) -> ResultCode {
    match result {
        Ok(outcome) => match &outcome.warning {
            Some(warning) => {
                record(warning.to_string());
                ResultCode::from(warning)
            }
            None => ResultCode::Ok,
        },
        Err(error) => {
            record(error.to_string());
            ResultCode::from(error)
        }
    }
}

/// Like [`capture`], for operations that cannot warn.
pub fn capture_value<T>(result: &Result<T, Error>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Ok,
        Err(error) => {
            record(error.to_string());
            ResultCode::from(error)
        }
    }
}

/// The message recorded by the most recent non-OK capture, if any.
pub fn last_message() -> Option<String> {
    LAST_MESSAGE.lock().unwrap().clone()
}

/// Release the last-message cell.
pub fn cleanup() {
    *LAST_MESSAGE.lock().unwrap() = None;
}

fn record(message: String) {
    *LAST_MESSAGE.lock().unwrap() = Some(message);
}
