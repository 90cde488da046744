// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::Bytes;

/// Backing storage of a payload container
///
/// `Owned` memory belongs to the container and is released on dispose.
/// `Borrowed` memory is a shared handle onto a producer buffer; dropping the
/// handle never frees the producer's copy.
#[derive(Debug, Clone, Default)]
pub enum PayloadData {
    #[default]
    Empty,
    Owned(Vec<u8>),
    Borrowed(Bytes),
}

/// Move-only byte buffer handed from a producer to the recording queue
///
/// # Examples
///
/// ```
/// use frame_recorder::payload::PayloadContainer;
///
/// let mut container = PayloadContainer::copied(b"frame").with_tag("frame_0001.bin");
/// assert!(container.owns_memory());
/// assert_eq!(container.tag(), Some("frame_0001.bin"));
///
/// container.dispose();
/// assert!(container.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct PayloadContainer {
    data: PayloadData,
    tag: Option<String>,
}

impl PayloadContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container owning a private copy of `bytes`
    pub fn copied(bytes: &[u8]) -> Self {
        let mut container = Self::new();
        container.copy_from(bytes);
        container
    }

    /// Container referencing producer memory without taking ownership
    pub fn borrowed(bytes: Bytes) -> Self {
        let mut container = Self::new();
        container.assign(bytes);
        container
    }

    /// Replace the content with an owned copy of `bytes`
    pub fn copy_from(&mut self, bytes: &[u8]) {
        self.dispose();
        self.data = PayloadData::Owned(bytes.to_vec());
    }

    /// Replace the content with a borrowed handle
    pub fn assign(&mut self, bytes: Bytes) {
        self.dispose();
        self.data = PayloadData::Borrowed(bytes);
    }

    /// Release the content. Safe to call any number of times.
    pub fn dispose(&mut self) {
        self.data = PayloadData::Empty;
    }

    pub fn owns_memory(&self) -> bool {
        matches!(self.data, PayloadData::Owned(_))
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.data {
            PayloadData::Empty => &[],
            PayloadData::Owned(buf) => buf,
            PayloadData::Borrowed(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &PayloadData {
        &self.data
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_owns_memory() {
        let source = vec![1u8, 2, 3];
        let container = PayloadContainer::copied(&source);
        assert!(container.owns_memory());
        assert_eq!(container.as_slice(), &source[..]);
    }

    #[test]
    fn test_borrowed_survives_double_dispose() {
        let producer = Bytes::from(vec![9u8; 32]);
        let mut container = PayloadContainer::borrowed(producer.clone());
        assert!(!container.owns_memory());
        assert_eq!(container.len(), 32);

        container.dispose();
        container.dispose();

        assert!(container.is_empty());
        assert_eq!(producer.len(), 32);
        assert!(producer.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_reinitialize_replaces_content() {
        let mut container = PayloadContainer::borrowed(Bytes::from_static(b"borrowed"));
        container.copy_from(b"owned");
        assert!(container.owns_memory());
        assert_eq!(container.as_slice(), b"owned");

        container.assign(Bytes::from_static(b"again"));
        assert!(!container.owns_memory());
        assert_eq!(container.as_slice(), b"again");
    }

    #[test]
    fn test_zero_length_payload() {
        let container = PayloadContainer::copied(&[]);
        assert!(container.is_empty());
        assert!(container.owns_memory());
    }

    #[test]
    fn test_dispose_keeps_tag() {
        let mut container = PayloadContainer::copied(b"x").with_tag("a.bin");
        container.dispose();
        assert_eq!(container.tag(), Some("a.bin"));
    }
}
