//! Tool handlers backing the chat orchestrator.
//!
//! Each tool invokes domain logic and returns a serialized [`ClubView`]; the
//! orchestration loop records the call and result into conversation history.
//! None of the "get" tools mutate stored data, and the form tools only signal
//! the client — submissions land on the boundary endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use odyssey_agent::{Agent, AgentTool, ToolExecutionResult};
use odyssey_ai::ToolDefinition;
use odyssey_club::ClubService;

use crate::view::ClubView;

fn view_result(view: ClubView) -> ToolExecutionResult {
    match serde_json::to_value(&view) {
        Ok(content) => ToolExecutionResult::ok(content),
        Err(error) => ToolExecutionResult::error(json!({
            "error": format!("failed to serialize view: {error}")
        })),
    }
}

fn argument_error(error: impl std::fmt::Display) -> ToolExecutionResult {
    ToolExecutionResult::error(json!({
        "error": format!("invalid tool arguments: {error}")
    }))
}

fn parse_optional_args<T: DeserializeOwned + Default>(
    arguments: Value,
) -> Result<T, serde_json::Error> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(arguments)
}

/// Registers the full club tool set on an agent.
pub fn register_club_tools(agent: &mut Agent, service: &Arc<ClubService>) {
    agent.register_tool(CurrentWeekAlbumTool::new(Arc::clone(service)));
    agent.register_tool(ListBacklogTool::new(Arc::clone(service)));
    agent.register_tool(AlbumRatingsTool::new(Arc::clone(service)));
    agent.register_tool(ShowNominationFormTool);
    agent.register_tool(ShowRatingFormTool::new(Arc::clone(service)));
    agent.register_tool(AllRatingsTool::new(Arc::clone(service)));
    agent.register_tool(AllCommentsTool::new(Arc::clone(service)));
}

/// Resolves the current week's album or the newest nomination.
pub struct CurrentWeekAlbumTool {
    service: Arc<ClubService>,
}

impl CurrentWeekAlbumTool {
    pub fn new(service: Arc<ClubService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AgentTool for CurrentWeekAlbumTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getCurrentWeekAlbum".to_string(),
            description:
                "Get the current week's album (most recently picked, or the newest nomination)"
                    .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        let Some(current) = self.service.current_week_album() else {
            return view_result(ClubView::Notice {
                message: "No current week album found.".to_string(),
            });
        };

        // Nominations have not been rated yet; stats stay suppressed.
        let stats = (!current.is_nomination)
            .then(|| self.service.album_rating_stats(&current.album.id));
        view_result(ClubView::AlbumCard {
            album: current.album,
            is_nomination: current.is_nomination,
            stats,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListBacklogArgs {
    #[serde(default)]
    limit: Option<usize>,
}

/// Lists backlog nominations in insertion order.
pub struct ListBacklogTool {
    service: Arc<ClubService>,
}

impl ListBacklogTool {
    pub fn new(service: Arc<ClubService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AgentTool for ListBacklogTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "listBacklog".to_string(),
            description: "List albums nominated for upcoming weeks".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of nominations to return"
                    }
                }
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let args: ListBacklogArgs = match parse_optional_args(arguments) {
            Ok(args) => args,
            Err(error) => return argument_error(error),
        };
        let albums = self.service.backlog_albums(args.limit);
        view_result(ClubView::AlbumGrid { albums })
    }
}

#[derive(Debug, Deserialize)]
struct AlbumRatingsArgs {
    #[serde(rename = "albumId")]
    album_id: String,
}

/// Aggregated ratings overview for a specific album.
pub struct AlbumRatingsTool {
    service: Arc<ClubService>,
}

impl AlbumRatingsTool {
    pub fn new(service: Arc<ClubService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AgentTool for AlbumRatingsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getAlbumRatings".to_string(),
            description: "Get the ratings overview for a specific album".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "albumId": {
                        "type": "string",
                        "description": "Identifier of the album to aggregate"
                    }
                },
                "required": ["albumId"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let args: AlbumRatingsArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(error) => return argument_error(error),
        };
        let ratings = self.service.album_ratings(&args.album_id);
        view_result(ClubView::Stats {
            album_id: ratings.album_id,
            avg: ratings.avg,
            count: ratings.count,
            comments: ratings.comments,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NominationFormArgs {
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    cover_url: Option<String>,
}

/// Signals the client to present the nomination form. Needs no domain access;
/// the actual submission lands on the nominations endpoint.
pub struct ShowNominationFormTool;

#[async_trait]
impl AgentTool for ShowNominationFormTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "showNominationForm".to_string(),
            description:
                "Show the album nomination form, pre-filled with any details the user already gave"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "artist": { "type": "string" },
                    "genre": { "type": "string" },
                    "coverUrl": { "type": "string" }
                }
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let args: NominationFormArgs = match parse_optional_args(arguments) {
            Ok(args) => args,
            Err(error) => return argument_error(error),
        };
        view_result(ClubView::NominationForm {
            title: args.title,
            artist: args.artist,
            genre: args.genre,
            cover_url: args.cover_url,
        })
    }
}

/// Signals the client to present the rating form for the current album.
pub struct ShowRatingFormTool {
    service: Arc<ClubService>,
}

impl ShowRatingFormTool {
    pub fn new(service: Arc<ClubService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AgentTool for ShowRatingFormTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "showRatingForm".to_string(),
            description: "Show the rating form for the current week's album".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        // Nominations are not rateable until promoted.
        let current = self
            .service
            .current_week_album()
            .filter(|current| !current.is_nomination);
        let Some(current) = current else {
            return view_result(ClubView::Notice {
                message: "No current album found to rate.".to_string(),
            });
        };

        view_result(ClubView::RatingForm {
            album_id: current.album.id,
            album_title: current.album.title,
            album_artist: current.album.artist,
        })
    }
}

/// Every rating joined against the catalog.
pub struct AllRatingsTool {
    service: Arc<ClubService>,
}

impl AllRatingsTool {
    pub fn new(service: Arc<ClubService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AgentTool for AllRatingsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getAllRatings".to_string(),
            description: "Get all album ratings for tabular display".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        let snapshot = self.service.all_ratings();
        view_result(ClubView::RatingsTable {
            ratings: snapshot.ratings,
            albums: snapshot.albums,
        })
    }
}

/// Commented ratings joined against the catalog.
pub struct AllCommentsTool {
    service: Arc<ClubService>,
}

impl AllCommentsTool {
    pub fn new(service: Arc<ClubService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AgentTool for AllCommentsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getAllComments".to_string(),
            description: "Get all album ratings that carry comments, with their stars".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        let snapshot = self.service.all_ratings();
        let ratings = snapshot
            .ratings
            .into_iter()
            .filter(|rating| rating.comment_text().is_some())
            .collect();
        view_result(ClubView::CommentList {
            ratings,
            albums: snapshot.albums,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use odyssey_agent::AgentTool;
    use odyssey_club::{Album, BacklogAlbum, ClubService, ClubStore, Rating};

    use super::{
        AlbumRatingsTool, AllCommentsTool, AllRatingsTool, CurrentWeekAlbumTool, ListBacklogTool,
        ShowNominationFormTool, ShowRatingFormTool,
    };

    fn picked_album(id: &str, picked_ms: i64) -> Album {
        Album {
            id: id.to_string(),
            title: format!("album {id}"),
            artist: "artist".to_string(),
            genre: None,
            cover_url: None,
            picked_at: Some(Utc.timestamp_millis_opt(picked_ms).unwrap()),
            created_at: None,
        }
    }

    fn nomination(id: &str) -> BacklogAlbum {
        BacklogAlbum {
            id: id.to_string(),
            title: format!("nomination {id}"),
            artist: "artist".to_string(),
            genre: None,
            cover_url: None,
            created_at: None,
        }
    }

    fn rating(album_id: &str, score: u8, comment: Option<&str>) -> Rating {
        Rating {
            album_id: album_id.to_string(),
            user: "sam".to_string(),
            score,
            comment: comment.map(str::to_string),
            created_at: None,
        }
    }

    fn service(dir: &tempfile::TempDir) -> Arc<ClubService> {
        Arc::new(ClubService::new(ClubStore::new(dir.path())))
    }

    async fn execute_ok(tool: &dyn AgentTool, arguments: Value) -> Value {
        let result = tool.execute(arguments).await;
        assert!(!result.is_error, "unexpected tool error: {:?}", result);
        result.content
    }

    #[tokio::test]
    async fn current_week_album_includes_stats_for_picked_albums() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        service
            .store()
            .write_albums(&[picked_album("a1", 1_700_000_000_000)])
            .expect("write albums");
        service
            .store()
            .write_ratings(&[rating("a1", 4, None), rating("a1", 2, None)])
            .expect("write ratings");

        let view = execute_ok(&CurrentWeekAlbumTool::new(service), json!({})).await;
        assert_eq!(view["kind"], "album_card");
        assert_eq!(view["isNomination"], false);
        assert_eq!(view["stats"]["avg"], 3.0);
        assert_eq!(view["stats"]["count"], 2);
    }

    #[tokio::test]
    async fn current_week_album_suppresses_stats_for_nominations() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        service
            .store()
            .write_backlog(&[nomination("id_1700000000000_x")])
            .expect("write backlog");

        let view = execute_ok(&CurrentWeekAlbumTool::new(service), json!({})).await;
        assert_eq!(view["kind"], "album_card");
        assert_eq!(view["isNomination"], true);
        assert!(view.get("stats").is_none());
    }

    #[tokio::test]
    async fn current_week_album_notices_when_nothing_qualifies() {
        let dir = tempdir().expect("tempdir");
        let view = execute_ok(&CurrentWeekAlbumTool::new(service(&dir)), json!({})).await;
        assert_eq!(view["kind"], "notice");
        assert_eq!(view["message"], "No current week album found.");
    }

    #[tokio::test]
    async fn list_backlog_honors_the_limit() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        let entries: Vec<_> = (1..=5).map(|n| nomination(&format!("n{n}"))).collect();
        service
            .store()
            .write_backlog(&entries)
            .expect("write backlog");

        let tool = ListBacklogTool::new(service);
        let view = execute_ok(&tool, json!({ "limit": 2 })).await;
        assert_eq!(view["kind"], "album_grid");
        assert_eq!(view["albums"].as_array().expect("albums").len(), 2);
        assert_eq!(view["albums"][0]["id"], "n1");

        let unlimited = execute_ok(&tool, Value::Null).await;
        assert_eq!(unlimited["albums"].as_array().expect("albums").len(), 5);
    }

    #[tokio::test]
    async fn album_ratings_requires_an_album_id() {
        let dir = tempdir().expect("tempdir");
        let tool = AlbumRatingsTool::new(service(&dir));

        let result = tool.execute(json!({})).await;
        assert!(result.is_error);

        let view = execute_ok(&tool, json!({ "albumId": "a1" })).await;
        assert_eq!(view["kind"], "stats");
        assert_eq!(view["albumId"], "a1");
        assert_eq!(view["avg"], Value::Null);
        assert_eq!(view["count"], 0);
    }

    #[tokio::test]
    async fn nomination_form_carries_prefill_from_context() {
        let tool = ShowNominationFormTool;

        let view = execute_ok(
            &tool,
            json!({ "title": "Kid A", "artist": "Radiohead", "coverUrl": "http://x/y.jpg" }),
        )
        .await;
        assert_eq!(view["kind"], "nomination_form");
        assert_eq!(view["title"], "Kid A");
        assert_eq!(view["artist"], "Radiohead");
        assert_eq!(view["coverUrl"], "http://x/y.jpg");

        let empty = execute_ok(&tool, Value::Null).await;
        assert_eq!(empty["kind"], "nomination_form");
        assert!(empty.get("title").is_none());
    }

    #[tokio::test]
    async fn rating_form_targets_the_current_album() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        service
            .store()
            .write_albums(&[picked_album("a1", 1_700_000_000_000)])
            .expect("write albums");

        let view = execute_ok(&ShowRatingFormTool::new(service), json!({})).await;
        assert_eq!(view["kind"], "rating_form");
        assert_eq!(view["albumId"], "a1");
        assert_eq!(view["albumTitle"], "album a1");
    }

    #[tokio::test]
    async fn rating_form_declines_nominations_and_empty_clubs() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        let tool = ShowRatingFormTool::new(Arc::clone(&service));

        let view = execute_ok(&tool, json!({})).await;
        assert_eq!(view["kind"], "notice");
        assert_eq!(view["message"], "No current album found to rate.");

        service
            .store()
            .write_backlog(&[nomination("id_1700000000000_x")])
            .expect("write backlog");
        let view = execute_ok(&tool, json!({})).await;
        assert_eq!(view["kind"], "notice");
    }

    #[tokio::test]
    async fn all_ratings_returns_the_full_join() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        service
            .store()
            .write_albums(&[picked_album("a1", 1_000)])
            .expect("write albums");
        service
            .store()
            .write_ratings(&[rating("a1", 5, Some("great")), rating("a1", 3, Some(""))])
            .expect("write ratings");

        let view = execute_ok(&AllRatingsTool::new(service), json!({})).await;
        assert_eq!(view["kind"], "ratings_table");
        assert_eq!(view["ratings"].as_array().expect("ratings").len(), 2);
        assert_eq!(view["albums"].as_array().expect("albums").len(), 1);
    }

    #[tokio::test]
    async fn all_comments_filters_out_blank_comments() {
        let dir = tempdir().expect("tempdir");
        let service = service(&dir);
        service
            .store()
            .write_ratings(&[rating("a1", 5, Some("great")), rating("a1", 3, Some(""))])
            .expect("write ratings");

        let view = execute_ok(&AllCommentsTool::new(service), json!({})).await;
        assert_eq!(view["kind"], "comment_list");
        let ratings = view["ratings"].as_array().expect("ratings");
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0]["comment"], "great");
    }
}
