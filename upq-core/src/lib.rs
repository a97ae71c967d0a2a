mod client;

pub use client::{
    ErrorBody, FILE_FIELD, FILES_PATH, FailureClass, FilePayload, UploadClient, UploadError,
    UploadReceipt,
};
