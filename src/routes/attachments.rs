use crate::{
    error::AppError,
    middleware::guards::User,
    state::AppState,
    websocket::{MessageTarget, UploadInput},
};
use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, CONTENT_DISPOSITION, CONTENT_TYPE};
use actix_web::{post, web, HttpResponse};
use futures_util::stream::StreamExt;

/// Longest accepted value of a plain form field
const MAX_TEXT_FIELD_BYTES: usize = 16 * 1024;

#[derive(Default)]
struct UploadForm {
    receiver_id: Option<String>,
    room_id: Option<String>,
    text: Option<String>,
    file: Option<UploadInput>,
}

fn disposition(field: &Field) -> Option<ContentDisposition> {
    field
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| ContentDisposition::from_raw(value).ok())
}

/// Read a field body, stopping one byte past `limit` so oversize payloads
/// are detected without buffering them whole
async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {e}")))?;
        let room = (limit + 1).saturating_sub(data.len());
        data.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if data.len() > limit {
            break;
        }
    }
    Ok(data)
}

async fn read_text(field: &mut Field) -> Result<Option<String>, AppError> {
    let data = read_field(field, MAX_TEXT_FIELD_BYTES).await?;
    if data.len() > MAX_TEXT_FIELD_BYTES {
        return Err(AppError::BadRequest("form field is too long".into()));
    }
    let value = String::from_utf8(data)
        .map_err(|_| AppError::BadRequest("form field is not valid UTF-8".into()))?;
    let value = value.trim().to_string();
    Ok((!value.is_empty()).then_some(value))
}

async fn read_form(payload: &mut Multipart, max_bytes: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| AppError::BadRequest(format!("Multipart error: {e}")))?;
        let Some(cd) = disposition(&field) else {
            continue;
        };
        let name = cd.get_name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                let file_name = cd
                    .get_filename()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("file name is required".into()))?;
                let mime_type = field
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = read_field(&mut field, max_bytes).await?;
                form.file = Some(UploadInput {
                    file_name,
                    mime_type,
                    bytes,
                });
            }
            "receiver_id" | "receiverId" => form.receiver_id = read_text(&mut field).await?,
            "room_id" | "roomId" => form.room_id = read_text(&mut field).await?,
            "text" => form.text = read_text(&mut field).await?,
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    Ok(form)
}

/// Upload a file and send it as a message
/// POST /api/chat/send-file
#[post("/send-file")]
pub async fn send_file(
    state: web::Data<AppState>,
    user: User,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = read_form(&mut payload, state.config.upload.max_bytes).await?;
    let upload = form
        .file
        .ok_or_else(|| AppError::BadRequest("file is required".into()))?;
    let target = MessageTarget::from_fields(form.receiver_id.as_deref(), form.room_id.as_deref())?;

    state.ensure_user(user.id, &user.display_name()).await?;
    match state
        .dispatcher
        .upload_message(user.id, target, form.text, upload)
        .await?
    {
        Some(message) => Ok(HttpResponse::Created().json(message.to_payload())),
        None => Ok(HttpResponse::Accepted().json(serde_json::json!({ "status": "accepted" }))),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(send_file);
}
