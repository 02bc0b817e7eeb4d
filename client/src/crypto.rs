//! Chunked encrypt/decrypt bidirectional streams: a request iterator that
//! splits input into fixed-size chunks, and a sequence-validated response
//! reader.

use futures_util::StreamExt;
use tonic::transport::Channel;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::pb;

const CHUNK_SIZE: usize = 2048;

/// Options carried on the first request of an encrypt stream.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub component: String,
    pub key_name: String,
    pub key_wrap_algorithm: String,
    pub data_cipher: String,
    pub omit_decryption_key_name: bool,
    pub decryption_key_name: Option<String>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            component: String::new(),
            key_name: String::new(),
            key_wrap_algorithm: String::new(),
            data_cipher: "aes-gcm".to_owned(),
            omit_decryption_key_name: false,
            decryption_key_name: None,
        }
    }
}

impl EncryptOptions {
    fn validate(&self) -> Result<()> {
        if self.component.trim().is_empty() {
            return Err(Error::argument_invalid("crypto component must not be empty"));
        }
        if self.key_name.trim().is_empty() {
            return Err(Error::argument_invalid("key_name must not be empty"));
        }
        if self.key_wrap_algorithm.trim().is_empty() {
            return Err(Error::argument_invalid("key_wrap_algorithm must not be empty"));
        }
        Ok(())
    }
}

/// Options carried on the first request of a decrypt stream.
#[derive(Debug, Clone)]
pub struct DecryptOptions {
    pub component: String,
    pub key_name: Option<String>,
}

impl DecryptOptions {
    fn validate(&self) -> Result<()> {
        if self.component.trim().is_empty() {
            return Err(Error::argument_invalid("crypto component must not be empty"));
        }
        Ok(())
    }
}

/// Typed facade over `EncryptAlpha1`/`DecryptAlpha1`.
#[derive(Clone)]
pub struct CryptoClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<Channel>,
    pub(crate) envelope: Envelope,
}

impl CryptoClient {
    pub(crate) fn new(inner: pb::runtime_client::RuntimeClient<Channel>, envelope: Envelope) -> Self {
        Self { inner, envelope }
    }

    /// Encrypts `data`, returning a reader over the decrypted-key-wrapped
    /// ciphertext stream.
    pub async fn encrypt(&self, options: EncryptOptions, data: Vec<u8>) -> Result<CryptoReader> {
        options.validate()?;

        let outbound = futures_util::stream::iter(build_encrypt_requests(options, data));
        let request = self.envelope.apply(tonic::Request::new(outbound))?;
        let stream = self.inner.clone().encrypt_alpha1(request).await?.into_inner();

        Ok(CryptoReader::new(stream.map(|r| {
            r.map(|resp| resp.payload).map_err(Error::from)
        })))
    }

    /// Decrypts `data`, returning a reader over the plaintext stream.
    pub async fn decrypt(&self, options: DecryptOptions, data: Vec<u8>) -> Result<CryptoReader> {
        options.validate()?;

        let outbound = futures_util::stream::iter(build_decrypt_requests(options, data));
        let request = self.envelope.apply(tonic::Request::new(outbound))?;
        let stream = self.inner.clone().decrypt_alpha1(request).await?.into_inner();

        Ok(CryptoReader::new(stream.map(|r| {
            r.map(|resp| resp.payload).map_err(Error::from)
        })))
    }
}

fn build_encrypt_requests(options: EncryptOptions, data: Vec<u8>) -> Vec<pb::EncryptRequest> {
    let mut requests = vec![pb::EncryptRequest {
        request_type: Some(pb::encrypt_request::RequestType::Options(pb::EncryptRequestOptions {
            component_name: options.component,
            key_name: options.key_name,
            key_wrap_algorithm: options.key_wrap_algorithm,
            data_encryption_cipher: options.data_cipher,
            omit_decryption_key_name: options.omit_decryption_key_name,
            decryption_key_name: options.decryption_key_name.unwrap_or_default(),
        })),
    }];
    requests.extend(chunk(&data).enumerate().map(|(seq, chunk)| pb::EncryptRequest {
        request_type: Some(pb::encrypt_request::RequestType::Payload(pb::StreamPayload {
            data: chunk.to_vec(),
            seq: seq as u64,
        })),
    }));
    requests
}

fn build_decrypt_requests(options: DecryptOptions, data: Vec<u8>) -> Vec<pb::DecryptRequest> {
    let mut requests = vec![pb::DecryptRequest {
        request_type: Some(pb::decrypt_request::RequestType::Options(pb::DecryptRequestOptions {
            component_name: options.component,
            key_name: options.key_name.unwrap_or_default(),
        })),
    }];
    requests.extend(chunk(&data).enumerate().map(|(seq, chunk)| pb::DecryptRequest {
        request_type: Some(pb::decrypt_request::RequestType::Payload(pb::StreamPayload {
            data: chunk.to_vec(),
            seq: seq as u64,
        })),
    }));
    requests
}

fn chunk(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(CHUNK_SIZE)
}

/// A reader over a crypto response stream. Validates that payload chunks
/// arrive in strict, gapless `seq` order; any gap or premature end surfaces
/// as `Error::CryptoStream`.
pub struct CryptoReader {
    stream: std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<Option<pb::StreamPayload>>> + Send>>,
    expected_seq: u64,
    buffer: Vec<u8>,
    done: bool,
}

impl CryptoReader {
    fn new<S>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = Result<Option<pb::StreamPayload>>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            expected_seq: 0,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Yields the next validated chunk's payload bytes, or `None` at the end
    /// of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let Some(payload) = self.stream.next().await.transpose()?.flatten() else {
            self.done = true;
            return Ok(None);
        };
        if payload.seq != self.expected_seq {
            self.done = true;
            return Err(Error::CryptoStream(format!(
                "expected seq {}, got {}",
                self.expected_seq, payload.seq
            )));
        }
        self.expected_seq += 1;
        Ok(Some(payload.data))
    }

    /// Reads up to `n` bytes, buffering any overage locally. `n = None` reads
    /// until the stream ends.
    pub async fn read(&mut self, n: Option<usize>) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        loop {
            if let Some(limit) = n
                && out.len() >= limit
            {
                break;
            }

            if !self.buffer.is_empty() {
                let take = match n {
                    Some(limit) => (limit - out.len()).min(self.buffer.len()),
                    None => self.buffer.len(),
                };
                out.extend(self.buffer.drain(..take));
                continue;
            }

            match self.next_chunk().await? {
                Some(chunk) => self.buffer = chunk,
                None => break,
            }
        }

        Ok(out)
    }
}
