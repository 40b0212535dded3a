use crate::utils::error::Result;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn template_paths(&self) -> &[String];
    fn context_file(&self) -> Option<&str>;
    fn output_path(&self) -> &str;
    fn templates(&self) -> &[String];
    fn concurrency(&self) -> usize;
}
