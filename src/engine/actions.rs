use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse class of an action, used to pick the base rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Read,
    Write,
    Sensitive,
    Critical,
    Admin,
}

/// How badly abuse of an action hurts, independent of its quota cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Stable taxonomy of everything the host application lets a client do.
/// The classifier maps inbound (method, path) pairs onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCategory {
    PostCreate,
    PostRead,
    PostUpdate,
    PostDelete,
    PostList,
    PostSearch,
    CommentCreate,
    CommentRead,
    CommentDelete,
    LikeCreate,
    LikeDelete,
    CommunityCreate,
    CommunityJoin,
    CommunityLeave,
    CommunityRead,
    UserRead,
    UserUpdate,
    UserSearch,
    FollowCreate,
    FollowDelete,
    MessageSend,
    MessageRead,
    MediaUpload,
    ReportCreate,
    AuthLogin,
    AuthRegister,
    AuthPasswordReset,
    SessionRefresh,
    AdminAction,
    FeedRead,
    GenericRead,
    GenericWrite,
    GenericDelete,
}

/// Static metadata for one action category. Loaded once, never mutated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub category: ActionCategory,
    pub action_type: ActionType,
    pub severity: Severity,
    /// Quota units one invocation consumes, 1..=10.
    pub cost: u32,
    pub requires_auth: bool,
    pub requires_verification: bool,
    pub admin_only: bool,
}

impl ActionCategory {
    /// Stable snake_case name used in store keys (`ratelimit:{action}:{id}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::PostCreate => "post_create",
            ActionCategory::PostRead => "post_read",
            ActionCategory::PostUpdate => "post_update",
            ActionCategory::PostDelete => "post_delete",
            ActionCategory::PostList => "post_list",
            ActionCategory::PostSearch => "post_search",
            ActionCategory::CommentCreate => "comment_create",
            ActionCategory::CommentRead => "comment_read",
            ActionCategory::CommentDelete => "comment_delete",
            ActionCategory::LikeCreate => "like_create",
            ActionCategory::LikeDelete => "like_delete",
            ActionCategory::CommunityCreate => "community_create",
            ActionCategory::CommunityJoin => "community_join",
            ActionCategory::CommunityLeave => "community_leave",
            ActionCategory::CommunityRead => "community_read",
            ActionCategory::UserRead => "user_read",
            ActionCategory::UserUpdate => "user_update",
            ActionCategory::UserSearch => "user_search",
            ActionCategory::FollowCreate => "follow_create",
            ActionCategory::FollowDelete => "follow_delete",
            ActionCategory::MessageSend => "message_send",
            ActionCategory::MessageRead => "message_read",
            ActionCategory::MediaUpload => "media_upload",
            ActionCategory::ReportCreate => "report_create",
            ActionCategory::AuthLogin => "auth_login",
            ActionCategory::AuthRegister => "auth_register",
            ActionCategory::AuthPasswordReset => "auth_password_reset",
            ActionCategory::SessionRefresh => "session_refresh",
            ActionCategory::AdminAction => "admin_action",
            ActionCategory::FeedRead => "feed_read",
            ActionCategory::GenericRead => "generic_read",
            ActionCategory::GenericWrite => "generic_write",
            ActionCategory::GenericDelete => "generic_delete",
        }
    }

    /// Parse the snake_case key form back into a category.
    pub fn parse(s: &str) -> Option<Self> {
        ALL_CATEGORIES.iter().copied().find(|c| c.as_str() == s)
    }

    /// Every category, for admin listings and tests.
    pub fn all() -> &'static [ActionCategory] {
        ALL_CATEGORIES
    }
}

const ALL_CATEGORIES: &[ActionCategory] = &[
    ActionCategory::PostCreate,
    ActionCategory::PostRead,
    ActionCategory::PostUpdate,
    ActionCategory::PostDelete,
    ActionCategory::PostList,
    ActionCategory::PostSearch,
    ActionCategory::CommentCreate,
    ActionCategory::CommentRead,
    ActionCategory::CommentDelete,
    ActionCategory::LikeCreate,
    ActionCategory::LikeDelete,
    ActionCategory::CommunityCreate,
    ActionCategory::CommunityJoin,
    ActionCategory::CommunityLeave,
    ActionCategory::CommunityRead,
    ActionCategory::UserRead,
    ActionCategory::UserUpdate,
    ActionCategory::UserSearch,
    ActionCategory::FollowCreate,
    ActionCategory::FollowDelete,
    ActionCategory::MessageSend,
    ActionCategory::MessageRead,
    ActionCategory::MediaUpload,
    ActionCategory::ReportCreate,
    ActionCategory::AuthLogin,
    ActionCategory::AuthRegister,
    ActionCategory::AuthPasswordReset,
    ActionCategory::SessionRefresh,
    ActionCategory::AdminAction,
    ActionCategory::FeedRead,
    ActionCategory::GenericRead,
    ActionCategory::GenericWrite,
    ActionCategory::GenericDelete,
];

/// Static lookup: metadata for every category.
/// Kept as a data table rather than branching logic so it stays trivially
/// testable and auditable.
pub fn metadata_of(category: ActionCategory) -> ActionMetadata {
    use ActionCategory as C;
    use ActionType as T;
    use Severity as S;
    let (action_type, severity, cost, requires_auth, requires_verification, admin_only) =
        match category {
            C::PostCreate => (T::Write, S::Medium, 3, true, false, false),
            C::PostRead => (T::Read, S::Low, 1, false, false, false),
            C::PostUpdate => (T::Write, S::Medium, 2, true, false, false),
            C::PostDelete => (T::Write, S::Medium, 2, true, false, false),
            C::PostList => (T::Read, S::Low, 1, false, false, false),
            C::PostSearch => (T::Read, S::Low, 2, false, false, false),
            C::CommentCreate => (T::Write, S::Medium, 2, true, false, false),
            C::CommentRead => (T::Read, S::Low, 1, false, false, false),
            C::CommentDelete => (T::Write, S::Low, 1, true, false, false),
            C::LikeCreate => (T::Write, S::Low, 1, true, false, false),
            C::LikeDelete => (T::Write, S::Low, 1, true, false, false),
            C::CommunityCreate => (T::Sensitive, S::High, 8, true, true, false),
            C::CommunityJoin => (T::Write, S::Low, 1, true, false, false),
            C::CommunityLeave => (T::Write, S::Low, 1, true, false, false),
            C::CommunityRead => (T::Read, S::Low, 1, false, false, false),
            C::UserRead => (T::Read, S::Low, 1, false, false, false),
            C::UserUpdate => (T::Sensitive, S::Medium, 3, true, false, false),
            C::UserSearch => (T::Read, S::Low, 2, false, false, false),
            C::FollowCreate => (T::Write, S::Low, 1, true, false, false),
            C::FollowDelete => (T::Write, S::Low, 1, true, false, false),
            C::MessageSend => (T::Write, S::High, 3, true, true, false),
            C::MessageRead => (T::Read, S::Low, 1, true, false, false),
            C::MediaUpload => (T::Sensitive, S::High, 5, true, false, false),
            C::ReportCreate => (T::Write, S::Medium, 2, true, false, false),
            C::AuthLogin => (T::Critical, S::High, 5, false, false, false),
            C::AuthRegister => (T::Critical, S::High, 8, false, false, false),
            C::AuthPasswordReset => (T::Critical, S::Critical, 10, false, false, false),
            C::SessionRefresh => (T::Sensitive, S::Medium, 2, true, false, false),
            C::AdminAction => (T::Admin, S::Critical, 1, true, true, true),
            C::FeedRead => (T::Read, S::Low, 1, false, false, false),
            C::GenericRead => (T::Read, S::Low, 1, false, false, false),
            C::GenericWrite => (T::Write, S::Medium, 2, true, false, false),
            C::GenericDelete => (T::Write, S::Medium, 2, true, false, false),
        };
    ActionMetadata {
        category,
        action_type,
        severity,
        cost,
        requires_auth,
        requires_verification,
        admin_only,
    }
}

impl ActionMetadata {
    /// Read-ish actions: the scraping heuristic only looks at these.
    pub fn is_read_like(&self) -> bool {
        self.action_type == ActionType::Read
    }

    /// Auth-surface actions: sequential failures here look like credential
    /// stuffing rather than generic failure storms.
    pub fn is_auth_surface(&self) -> bool {
        matches!(
            self.category,
            ActionCategory::AuthLogin
                | ActionCategory::AuthRegister
                | ActionCategory::AuthPasswordReset
        )
    }
}

struct RouteRule {
    method: &'static str,
    pattern: Regex,
    category: ActionCategory,
}

// Ordered: first match wins, so the specific rules sit above the broad ones.
static ROUTE_RULES: Lazy<Vec<RouteRule>> = Lazy::new(|| {
    let rule = |method: &'static str, pattern: &str, category: ActionCategory| RouteRule {
        method,
        pattern: Regex::new(pattern).expect("invalid route rule regex"),
        category,
    };
    vec![
        rule("POST", r"^/api/auth/login/?$", ActionCategory::AuthLogin),
        rule("POST", r"^/api/auth/register/?$", ActionCategory::AuthRegister),
        rule("POST", r"^/api/auth/password-reset/?$", ActionCategory::AuthPasswordReset),
        rule("POST", r"^/api/auth/refresh/?$", ActionCategory::SessionRefresh),
        rule("*", r"^/api/admin(/|$)", ActionCategory::AdminAction),
        rule("GET", r"^/api/feed/?$", ActionCategory::FeedRead),
        rule("GET", r"^/api/search/posts/?$", ActionCategory::PostSearch),
        rule("GET", r"^/api/search/users/?$", ActionCategory::UserSearch),
        rule("POST", r"^/api/posts/[^/]+/comments/?$", ActionCategory::CommentCreate),
        rule("GET", r"^/api/posts/[^/]+/comments/?$", ActionCategory::CommentRead),
        rule("DELETE", r"^/api/comments/[^/]+/?$", ActionCategory::CommentDelete),
        rule("POST", r"^/api/posts/[^/]+/like/?$", ActionCategory::LikeCreate),
        rule("DELETE", r"^/api/posts/[^/]+/like/?$", ActionCategory::LikeDelete),
        rule("POST", r"^/api/posts/?$", ActionCategory::PostCreate),
        rule("GET", r"^/api/posts/[^/]+/?$", ActionCategory::PostRead),
        rule("PUT", r"^/api/posts/[^/]+/?$", ActionCategory::PostUpdate),
        rule("PATCH", r"^/api/posts/[^/]+/?$", ActionCategory::PostUpdate),
        rule("DELETE", r"^/api/posts/[^/]+/?$", ActionCategory::PostDelete),
        rule("GET", r"^/api/posts/?$", ActionCategory::PostList),
        rule("POST", r"^/api/communities/[^/]+/join/?$", ActionCategory::CommunityJoin),
        rule("POST", r"^/api/communities/[^/]+/leave/?$", ActionCategory::CommunityLeave),
        rule("POST", r"^/api/communities/?$", ActionCategory::CommunityCreate),
        rule("GET", r"^/api/communities(/|$)", ActionCategory::CommunityRead),
        rule("POST", r"^/api/users/[^/]+/follow/?$", ActionCategory::FollowCreate),
        rule("DELETE", r"^/api/users/[^/]+/follow/?$", ActionCategory::FollowDelete),
        rule("GET", r"^/api/users/[^/]+/?$", ActionCategory::UserRead),
        rule("PUT", r"^/api/users/[^/]+/?$", ActionCategory::UserUpdate),
        rule("PATCH", r"^/api/users/[^/]+/?$", ActionCategory::UserUpdate),
        rule("POST", r"^/api/messages/?$", ActionCategory::MessageSend),
        rule("GET", r"^/api/messages(/|$)", ActionCategory::MessageRead),
        rule("POST", r"^/api/media/?$", ActionCategory::MediaUpload),
        rule("POST", r"^/api/reports/?$", ActionCategory::ReportCreate),
    ]
});

/// Map an inbound request onto an action category.
///
/// Falls back to a per-method generic when no rule matches, so an unknown
/// route is still admitted under the most conservative matching window.
pub fn classify(method: &str, path: &str) -> ActionCategory {
    let method = method.to_ascii_uppercase();
    for rule in ROUTE_RULES.iter() {
        if (rule.method == "*" || rule.method == method) && rule.pattern.is_match(path) {
            return rule.category;
        }
    }
    match method.as_str() {
        "POST" | "PUT" | "PATCH" => ActionCategory::GenericWrite,
        "DELETE" => ActionCategory::GenericDelete,
        _ => ActionCategory::GenericRead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_has_metadata_in_range() {
        for &category in ActionCategory::all() {
            let meta = metadata_of(category);
            assert!((1..=10).contains(&meta.cost), "{:?} cost out of range", category);
            assert_eq!(meta.category, category);
        }
    }

    #[test]
    fn test_classify_specific_routes() {
        assert_eq!(classify("POST", "/api/posts"), ActionCategory::PostCreate);
        assert_eq!(classify("GET", "/api/posts"), ActionCategory::PostList);
        assert_eq!(classify("GET", "/api/posts/42"), ActionCategory::PostRead);
        assert_eq!(classify("DELETE", "/api/posts/42"), ActionCategory::PostDelete);
        assert_eq!(classify("POST", "/api/posts/42/comments"), ActionCategory::CommentCreate);
        assert_eq!(classify("POST", "/api/auth/login"), ActionCategory::AuthLogin);
        assert_eq!(classify("GET", "/api/admin/stats"), ActionCategory::AdminAction);
        assert_eq!(classify("POST", "/api/admin/bans"), ActionCategory::AdminAction);
    }

    #[test]
    fn test_classify_method_fallbacks() {
        assert_eq!(classify("GET", "/totally/unknown"), ActionCategory::GenericRead);
        assert_eq!(classify("POST", "/totally/unknown"), ActionCategory::GenericWrite);
        assert_eq!(classify("PUT", "/totally/unknown"), ActionCategory::GenericWrite);
        assert_eq!(classify("DELETE", "/totally/unknown"), ActionCategory::GenericDelete);
    }

    #[test]
    fn test_classify_is_case_insensitive_on_method() {
        assert_eq!(classify("post", "/api/posts"), ActionCategory::PostCreate);
    }

    #[test]
    fn test_key_names_round_trip() {
        for &category in ActionCategory::all() {
            assert_eq!(ActionCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_admin_routes_are_admin_only() {
        let meta = metadata_of(classify("POST", "/api/admin/config"));
        assert!(meta.admin_only);
        assert_eq!(meta.action_type, ActionType::Admin);
    }

    #[test]
    fn test_auth_surface_flags() {
        assert!(metadata_of(ActionCategory::AuthLogin).is_auth_surface());
        assert!(metadata_of(ActionCategory::AuthPasswordReset).is_auth_surface());
        assert!(!metadata_of(ActionCategory::PostCreate).is_auth_surface());
    }
}
