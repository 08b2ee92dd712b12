//! Container image references
//!
//! Parses DLC image URIs such as
//! `763104351884.dkr.ecr.us-west-2.amazonaws.com/pytorch-training:1.8.1-gpu-py36-cu111-ubuntu18.04`
//! and extracts framework, version, processor, CUDA and Python information
//! from the repository name and tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::version::{FrameworkVersion, VersionError};
use crate::catalog::Processor;

/// Image parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Empty image reference")]
    Empty,

    #[error("Cannot determine framework from image {0}")]
    UnknownFramework(String),

    #[error("Cannot find a framework version in image tag {0}")]
    MissingVersion(String),

    #[error("Cannot find a processor type in image tag {0}")]
    MissingProcessor(String),

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Frameworks recognised in image repository names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    HuggingfaceTensorflow,
    HuggingfacePytorch,
    Tensorflow,
    Mxnet,
    Pytorch,
}

impl Framework {
    pub fn name(&self) -> &'static str {
        match self {
            Framework::HuggingfaceTensorflow => "huggingface_tensorflow",
            Framework::HuggingfacePytorch => "huggingface_pytorch",
            Framework::Tensorflow => "tensorflow",
            Framework::Mxnet => "mxnet",
            Framework::Pytorch => "pytorch",
        }
    }

    /// Detection order matters: huggingface repositories also contain the
    /// base framework name.
    fn detection_order() -> [(Framework, &'static str); 5] {
        [
            (Framework::HuggingfaceTensorflow, "huggingface-tensorflow"),
            (Framework::HuggingfacePytorch, "huggingface-pytorch"),
            (Framework::Tensorflow, "tensorflow"),
            (Framework::Mxnet, "mxnet"),
            (Framework::Pytorch, "pytorch"),
        ]
    }

}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// CUDA toolkit version encoded in the tag (`cu111` is 11.1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CudaVersion {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for CudaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cu{}{}", self.major, self.minor)
    }
}

/// A reference to a container image under test
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    uri: String,
}

impl ImageReference {
    pub fn parse(uri: &str) -> Result<Self, ImageError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self {
            uri: uri.to_string(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Registry host, if the image lives in a remote registry
    pub fn registry(&self) -> Option<&str> {
        let (head, _) = self.uri.split_once('/')?;
        if head.contains('.') || head.contains(':') {
            Some(head)
        } else {
            None
        }
    }

    /// Repository path without registry and tag
    pub fn repository(&self) -> &str {
        let without_registry = match self.registry() {
            Some(registry) => &self.uri[registry.len() + 1..],
            None => &self.uri,
        };
        without_registry
            .split_once(':')
            .map(|(repo, _)| repo)
            .unwrap_or(without_registry)
    }

    /// Image tag, or the whole reference when no tag separator is present
    pub fn tag(&self) -> &str {
        let last_segment = self.uri.rsplit('/').next().unwrap_or(&self.uri);
        last_segment
            .split_once(':')
            .map(|(_, tag)| tag)
            .unwrap_or(last_segment)
    }

    fn tag_tokens(&self) -> impl Iterator<Item = &str> {
        self.tag().split('-').filter(|t| !t.is_empty())
    }

    pub fn framework(&self) -> Result<Framework, ImageError> {
        let repository = self.repository().to_lowercase();
        Framework::detection_order()
            .into_iter()
            .find(|(_, token)| repository.contains(token))
            .map(|(framework, _)| framework)
            .ok_or_else(|| ImageError::UnknownFramework(self.uri.clone()))
    }

    /// Raw version string from the tag (first `N.N` or `N.N.N` token)
    pub fn version_string(&self) -> Result<&str, ImageError> {
        self.tag_tokens()
            .find(|token| is_dotted_version(token))
            .ok_or_else(|| ImageError::MissingVersion(self.tag().to_string()))
    }

    pub fn framework_version(&self) -> Result<FrameworkVersion, ImageError> {
        Ok(self.version_string()?.parse()?)
    }

    /// Framework name and version string, as read from the image reference
    pub fn framework_and_version(&self) -> Result<(Framework, String), ImageError> {
        Ok((self.framework()?, self.version_string()?.to_string()))
    }

    pub fn processor(&self) -> Result<Processor, ImageError> {
        self.tag_tokens()
            .find_map(Processor::from_str)
            .ok_or_else(|| ImageError::MissingProcessor(self.tag().to_string()))
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self.processor(), Ok(Processor::Gpu))
    }

    pub fn cuda_version(&self) -> Option<CudaVersion> {
        self.tag_tokens().find_map(|token| {
            let digits = token.strip_prefix("cu")?;
            if digits.len() < 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let (major, minor) = digits.split_at(digits.len() - 1);
            Some(CudaVersion {
                major: major.parse().ok()?,
                minor: minor.parse().ok()?,
            })
        })
    }

    /// Python major version from a `py3`/`py36`/`py27` token
    pub fn python_major(&self) -> Option<u32> {
        self.tag_tokens().find_map(|token| {
            let digits = token.strip_prefix("py")?;
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            digits[..1].parse().ok()
        })
    }
}

fn is_dotted_version(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

impl FromStr for ImageReference {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageReference> for String {
    fn from(image: ImageReference) -> Self {
        image.uri
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}
