/// Insertion-ordered part headers with unique keys.
///
/// Re-inserting a key that is already present replaces its value in place.
/// Lookups via [`PartHeaders::get`] ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One part of a multipart body: headers plus a raw, binary-safe payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartPart {
    pub headers: PartHeaders,
    pub body: Vec<u8>,
}

impl MultipartPart {
    pub fn new(headers: PartHeaders, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// A `form-data` part with a name and content type.
    pub fn form_data(name: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let headers = PartHeaders::new()
            .with("Content-Disposition", format!("form-data; name=\"{}\"", name))
            .with("Content-Type", content_type);
        Self::new(headers, body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false)
    }

    pub fn is_audio(&self) -> bool {
        self.content_type()
            .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("audio/"))
            .unwrap_or(false)
    }
}
