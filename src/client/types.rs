use std::fmt;

use tracing::warn;

use crate::Result;

/// Tag marking a file as encrypted (value is a boolean)
pub const TAG_KEY_USE_ENCRYPTED: &str = "internal-encrypted";
/// Tag carrying the base64 data key of an encrypted file
pub const TAG_KEY_DATA_KEY: &str = "internal-datakey";
/// Tag carrying the encryption algorithm of an encrypted file
pub const TAG_KEY_ENCRYPT_ALGO: &str = "internal-encryptalgo";

/// Identity of a remote configuration file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigFileId {
    pub namespace: String,
    pub group: String,
    pub file_name: String,
}

impl ConfigFileId {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            file_name: file_name.into(),
        }
    }
}

impl fmt::Display for ConfigFileId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.group, self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileTag {
    pub key: String,
    pub value: String,
}

/// A released configuration file as returned by `fetch_file`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub id: ConfigFileId,
    /// Raw content, ciphertext when `encrypted` is set
    pub content: String,
    pub version: u64,
    pub md5: String,
    pub encrypted: bool,
    pub tags: Vec<ConfigFileTag>,
}

impl ConfigFile {
    pub fn new(
        id: ConfigFileId,
        content: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            version,
            md5: String::new(),
            encrypted: false,
            tags: Vec::new(),
        }
    }

    fn tag(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }

    pub fn data_key(&self) -> Option<&str> {
        self.tag(TAG_KEY_DATA_KEY)
    }

    pub fn encrypt_algo(&self) -> Option<&str> {
        self.tag(TAG_KEY_ENCRYPT_ALGO)
    }

    /// Plain-text content of the file.
    ///
    /// Encrypted files go through `decryptor`. Without one, or when
    /// decryption fails, the raw content is returned and a warning logged.
    pub fn decoded_content(
        &self,
        decryptor: Option<&dyn ContentDecryptor>,
    ) -> String {
        if !self.encrypted {
            return self.content.clone();
        }

        let Some(decryptor) = decryptor else {
            warn!(file = %self.id, "encrypted file but no decryptor configured, using source content");
            return self.content.clone();
        };

        let algo = self.encrypt_algo().unwrap_or_default();
        let data_key = self.data_key().unwrap_or_default();
        match decryptor.decrypt(algo, data_key, &self.content) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(file = %self.id, algo, "decrypt failed, using source content: {}", e);
                self.content.clone()
            }
        }
    }
}

/// Entry of a group listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileInfo {
    pub file_name: String,
    pub version: u64,
}

/// A file and the version the caller already knows, sent with a long-poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedVersion {
    pub id: ConfigFileId,
    pub version: u64,
}

/// Outcome of one long-poll round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchResponse {
    /// A watched file moved past the version the caller sent
    Changed { id: ConfigFileId, version: u64 },
    /// Server idle period elapsed without changes
    NoChange,
    /// Status the engine does not understand
    Unrecognized { code: u32, info: String },
}

/// Decryption seam for encrypted file contents
pub trait ContentDecryptor: Send + Sync {
    /// Decrypt `ciphertext` produced with `algo` under the base64 `data_key`
    fn decrypt(
        &self,
        algo: &str,
        data_key: &str,
        ciphertext: &str,
    ) -> Result<String>;
}
