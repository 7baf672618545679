// Discovery module: advertising, browsing and invitation bookkeeping

pub mod advertiser;
pub mod browser;
pub mod invitation;

pub use advertiser::Advertiser;
pub use browser::Browser;
pub use invitation::{Direction, InvitationContext, InvitationTable, DEFAULT_INVITATION_TIMEOUT};
