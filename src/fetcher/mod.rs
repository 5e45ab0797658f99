pub mod file_downloader;
pub mod html_fetcher;

pub use file_downloader::*;
pub use html_fetcher::HtmlFetcher;
