mod gmail;
mod http;
mod oauth;
mod sheets;

pub use gmail::{search_query, GmailClient, PAGE_SIZE};
pub use oauth::{GoogleOAuth, OAuthConfig};
pub use sheets::SheetsClient;
