use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) value: f32,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

#[derive(Debug)]
pub struct MissingInput {
    pub(crate) name: &'static str,
    pub(crate) path: Option<PathBuf>,
}

impl fmt::Display for MissingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "the {} image path '{}' does not exist",
                self.name,
                path.display()
            ),
            None => write!(f, "no {} image was provided", self.name),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    /// An error in the image library occurred, eg failed to load/save
    Image(image::ImageError),
    /// A required input image was not provided, or its path does not exist.
    /// Checked before any decoding or tensor allocation happens.
    MissingInput(MissingInput),
    /// An input parameter had an invalid range specified
    InvalidRange(InvalidRange),
    /// The declarative extractor topology is malformed, eg a tap index is
    /// out of bounds or conv channel counts don't chain
    Topology(String),
    /// Io is notoriously error free with no problems, but we cover it just in case!
    Io(std::io::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ie) => write!(f, "{}", ie),
            Self::MissingInput(mi) => write!(f, "{}", mi),
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::Topology(msg) => write!(f, "invalid extractor topology: {}", msg),
            Self::Io(io) => write!(f, "{}", io),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(ie: image::ImageError) -> Self {
        Self::Image(ie)
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::Io(io)
    }
}
