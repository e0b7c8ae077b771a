use attribution_engine::traits::{ConversionPayload, ConversionUploader, UploadError, UploadOutcome};
use mockall::mock;

mock! {
    pub Uploader {}
    impl ConversionUploader for Uploader {
        async fn upload_conversions(&self, batch: &[ConversionPayload]) -> Result<Vec<UploadOutcome>, UploadError>;
    }
}
