pub mod hackernews;
pub mod newsapi;
pub mod page;
pub mod rss;

pub use hackernews::HackerNewsSource;
pub use newsapi::NewsApiSource;
pub use rss::{default_feeds, FeedConfig, RssSource};
