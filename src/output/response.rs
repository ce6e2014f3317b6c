//! CLI response formatting and output.
//!
//! Provides the JSON envelope, printing, and exit code mapping.

use serde::Serialize;
use shipcheck::{Error, Result};

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":{"code":"JSON_ERROR","message":"Failed to serialize response"}}"#
                .to_string()
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

pub fn print_success<T: Serialize>(data: T) {
    println!("{}", CliResponse::success(data).to_json());
}

pub fn print_json_result(result: Result<serde_json::Value>) {
    match result {
        Ok(data) => print_success(data),
        Err(err) => println!("{}", CliResponse::<()>::from_error(&err).to_json()),
    }
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (Err(Error::Json(err)), 1),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(&err);
            (Err(err), exit_code)
        }
    }
}

fn exit_code_for_error(err: &Error) -> i32 {
    match err {
        Error::Config(_) | Error::Feed(_) => 2,
        Error::Ssh(_) => 10,
        Error::Io(_) | Error::Json(_) | Error::Archive(_) | Error::Other(_) => 1,
    }
}
