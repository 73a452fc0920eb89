mod settings;

pub use settings::{
    DoctorConfig, GenerationConfig, MemoryConfig, ReceptionConfig, Settings, StorageConfig,
    TriageConfig,
};
