use crate::memory::MemoryProperties;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No memory type satisfies the requested properties: {0:?}")]
    OutOfMemoryType(MemoryProperties),

    #[error("Device memory allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: u64, reason: String },

    #[error("Heap {heap} uses memory type {memory_type}, which is excluded by the type mask {type_bits:#b}")]
    TypeMismatch {
        heap: String,
        memory_type: u32,
        type_bits: u32,
    },

    #[error("Heap {heap} exhausted: {requested} bytes at offset {offset} exceed its capacity of {capacity} bytes")]
    HeapExhausted {
        heap: String,
        requested: u64,
        offset: u64,
        capacity: u64,
    },

    #[error("Failed to create resource {label}")]
    ResourceCreationFailed {
        label: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Descriptor pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Upload of {size} bytes does not fit into {label} ({capacity} bytes)")]
    UploadOverflow {
        label: String,
        size: u64,
        capacity: u64,
    },

    #[error("Image {label} is in layout {actual:?}, expected {expected:?}")]
    LayoutMismatch {
        label: String,
        expected: crate::render::image::ImageLayout,
        actual: crate::render::image::ImageLayout,
    },

    #[error("Descriptor set update rejected: {0}")]
    DescriptorMismatch(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn new(message: String) -> Self {
        Self::Message(message)
    }

    pub fn resource_creation(label: &str, source: Error) -> Self {
        Self::ResourceCreationFailed {
            label: label.to_string(),
            source: Box::new(source),
        }
    }

    /// Follows `ResourceCreationFailed` wrappers down to the failure that caused them.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::ResourceCreationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
