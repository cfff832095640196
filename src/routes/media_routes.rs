use super::*;
use log::debug;
use safety::media::{self, ByteRange, MediaStore};

use rocket::http::ContentType;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, Responder, Response};
use rocket::tokio::fs::File;
use rocket::tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use std::path::Path;

/// The raw `Range` header, if any
pub struct RangeHeader(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RangeHeader {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RangeHeader(request.headers().get_one("Range").map(str::to_string)))
    }
}

/// A whole file (200) or one span of it (206)
pub struct MediaStream {
    file: File,
    size: u64,
    range: Option<ByteRange>,
    content_type: ContentType,
}

impl<'r> Responder<'r, 'static> for MediaStream {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let mut response = Response::build();
        response
            .header(self.content_type)
            .raw_header("Accept-Ranges", "bytes");

        match self.range {
            Some(range) => {
                response
                    .status(Status::PartialContent)
                    .raw_header("Content-Range", range.content_range(self.size))
                    .raw_header("Content-Length", range.len().to_string())
                    .streamed_body(self.file.take(range.len()));
            },
            None => {
                response
                    .status(Status::Ok)
                    .sized_body(Some(self.size as usize), self.file);
            },
        }
        response.ok()
    }
}

fn content_type_for(path: &Path) -> ContentType {
    path.extension()
        .and_then(|value| value.to_str())
        .and_then(ContentType::from_extension)
        .unwrap_or(ContentType::Binary)
}

///
///Media delivery with byte-range support
///
///INPUT:  stored file name, optional `Range: bytes=...`
///OUTPUT: 200 whole file, 206 partial, 404 unknown file, 416 unsatisfiable range
///
#[get("/videos/<filename>")]
async fn stream_media(filename: &str, range: RangeHeader, media: &State<MediaStore>) -> ApiResult<MediaStream> {
    let path = match media.resolve(filename) {
        Some(value) => value,
        None => return Err(ApiError::NotFound("File not found".into())),
    };
    let mut file = match File::open(&path).await {
        Ok(value) => value,
        Err(_) => return Err(ApiError::NotFound("File not found".into())),
    };
    let size = file.metadata().await?.len();
    let content_type = content_type_for(&path);

    let range = match range.0 {
        None => None,
        Some(header) => match media::parse_range(&header, size) {
            Ok(value) => Some(value),
            Err(value) => {
                debug!("Unsatisfiable range {} for {}", header, filename);
                return Err(ApiError::RangeNotSatisfiable { size: value.size });
            },
        },
    };
    if let Some(span) = range {
        file.seek(SeekFrom::Start(span.start)).await?;
    }

    Ok(MediaStream { file, size, range, content_type })
}

pub fn media_routes() -> Vec<Route> {
    routes![stream_media]
}
