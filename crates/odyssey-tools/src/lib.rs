//! The fixed tool registry the orchestrator exposes to the language model,
//! plus the typed view payloads those tools return.

pub mod tools;
pub mod view;

pub use tools::{
    register_club_tools, AlbumRatingsTool, AllCommentsTool, AllRatingsTool, CurrentWeekAlbumTool,
    ListBacklogTool, ShowNominationFormTool, ShowRatingFormTool,
};
pub use view::ClubView;
