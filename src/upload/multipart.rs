//! `multipart/form-data` bodies for the upload POST.

use rand::Rng;

const CRLF: &str = "\r\n";

pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self::with_boundary(format!(
            "------------------------{:016x}{:08x}",
            rng.gen::<u64>(),
            rng.gen::<u32>()
        ))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn file(mut self, field: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        let header = format!(
            "--{b}{crlf}Content-Disposition: form-data; name=\"{field}\"; filename=\"{file}\"{crlf}Content-Type: {ct}{crlf}{crlf}",
            b = self.boundary,
            crlf = CRLF,
            field = quote(field),
            file = quote(filename),
            ct = content_type,
        );
        self.body.extend_from_slice(header.as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(CRLF.as_bytes());
        self
    }

    /// Close the form and return the encoded body.
    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--{}", self.boundary, CRLF).as_bytes());
        self.body
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

fn quote(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' => "%22".to_string(),
            '\r' => "%0D".to_string(),
            '\n' => "%0A".to_string(),
            c => c.to_string(),
        })
        .collect()
}
