use std::collections::HashMap;

use axum::extract::Multipart;
use tracing::error;
use uuid::Uuid;

use crate::attachments::Upload;
use crate::error::{AppError, AppResult};

/// A multipart body with at most one `file` part and any number of text parts.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub file: Option<Upload>,
    fields: HashMap<String, String>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart, max_file_bytes: usize) -> AppResult<Self> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart.next_field().await.map_err(|err| {
            error!(error = %err, "invalid multipart data");
            AppError::bad_request(format!("invalid multipart data: {err}"))
        })? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                if data.len() > max_file_bytes {
                    return Err(AppError::bad_request(format!(
                        "file exceeds the maximum upload size of {max_file_bytes} bytes"
                    )));
                }
                form.file = Some(Upload {
                    file_name,
                    content_type,
                    bytes: data.to_vec(),
                });
            } else {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid value for {name}: {err}"))
                })?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Trimmed value of a text part; blank parts count as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn uuid(&self, name: &str) -> AppResult<Option<Uuid>> {
        self.text(name)
            .map(|value| {
                Uuid::parse_str(value)
                    .map_err(|_| AppError::bad_request(format!("{name} must be a valid UUID")))
            })
            .transpose()
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(
            self.text(name).map(str::to_ascii_lowercase).as_deref(),
            Some("true" | "1" | "yes" | "on")
        )
    }
}
