//! Worker-side dispatch: maps a request's verb and path to one handler.
//!
//! The table is an explicit ordered list of `(RouteKind, handler)` pairs.
//! Resolution is a pure function of `(verb, path)`:
//!
//! 1. The path is read with [`PathShape`]. A malformed id where an id is
//!    expected resolves to a bad request before any route is consulted.
//! 2. Routes are tried in [`RouteKind::PRIORITY`] order; the first whose verb
//!    and path shape match wins.
//! 3. Nothing matched: not found.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::envelope::{status, Request, Response};
use crate::path::{IdSegment, PathShape};
use crate::traits::{RequestHandler, Resource};

// ---------------------------------------------------------------------------
// RouteKind
// ---------------------------------------------------------------------------

/// The fixed set of routes a service can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    /// `GET /`
    ListAll,
    /// `GET /{id}`
    GetById,
    /// `POST /`
    Create,
    /// `PUT /{id}`
    Update,
    /// `DELETE /{id}`
    Delete,
    /// `GET /{relation}/{parent_id}`
    ListByParent,
    /// `POST /{id}/{action}`
    Action,
}

impl RouteKind {
    /// Match order. Earlier entries shadow later ones.
    pub const PRIORITY: [RouteKind; 7] = [
        RouteKind::ListAll,
        RouteKind::GetById,
        RouteKind::Create,
        RouteKind::Update,
        RouteKind::Delete,
        RouteKind::ListByParent,
        RouteKind::Action,
    ];

    /// Position in [`RouteKind::PRIORITY`].
    #[must_use]
    pub fn priority(self) -> usize {
        self as usize
    }

    fn matches(self, verb: &str, target: Target<'_>) -> Option<RouteParams> {
        match (self, verb, target) {
            (Self::ListAll, "GET", Target::Root) | (Self::Create, "POST", Target::Root) => {
                Some(RouteParams::default())
            }
            (Self::GetById, "GET", Target::Id(id))
            | (Self::Update, "PUT", Target::Id(id))
            | (Self::Delete, "DELETE", Target::Id(id)) => Some(RouteParams {
                id: Some(id),
                ..RouteParams::default()
            }),
            (Self::ListByParent, "GET", Target::Parent(parent_id)) => Some(RouteParams {
                parent_id: Some(parent_id),
                ..RouteParams::default()
            }),
            (Self::Action, "POST", Target::Action(id, action)) => Some(RouteParams {
                id: Some(id),
                action: Some(action.to_string()),
                ..RouteParams::default()
            }),
            _ => None,
        }
    }
}

/// Identifiers extracted from the path for the matched route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteParams {
    pub id: Option<u32>,
    pub parent_id: Option<u32>,
    /// Action name for [`RouteKind::Action`].
    pub action: Option<String>,
}

/// What a path addresses once ids have been validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target<'a> {
    Root,
    Id(u32),
    Parent(u32),
    Action(u32, &'a str),
    Nothing,
}

/// Outcome of [`DispatchTable::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched { kind: RouteKind, params: RouteParams },
    BadRequest(String),
    NotFound,
}

// ---------------------------------------------------------------------------
// DispatchTable
// ---------------------------------------------------------------------------

type RouteHandler = Box<dyn Fn(&Request, RouteParams) -> Response + Send + Sync>;

type ActionHandler = Box<dyn Fn(&Request, u32) -> Response + Send + Sync>;

/// Ordered `(RouteKind, handler)` pairs for one service.
///
/// [`RouteKind::Action`] routes are kept by name; only registered names are
/// read as actions, any other second segment stays unrouted.
pub struct DispatchTable {
    parent_relation: Option<String>,
    routes: Vec<(RouteKind, RouteHandler)>,
    actions: Vec<(String, ActionHandler)>,
}

impl DispatchTable {
    /// Creates an empty table. `parent_relation` is the literal segment that
    /// introduces a parent-scoped listing, if the service has one.
    #[must_use]
    pub fn new(parent_relation: Option<&str>) -> Self {
        Self {
            parent_relation: parent_relation.map(ToString::to_string),
            routes: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Registers `handler` for `kind`, replacing any earlier handler for it.
    #[must_use]
    pub fn route<F>(mut self, kind: RouteKind, handler: F) -> Self
    where
        F: Fn(&Request, RouteParams) -> Response + Send + Sync + 'static,
    {
        self.routes.retain(|(existing, _)| *existing != kind);
        self.routes.push((kind, Box::new(handler)));
        self.routes.sort_by_key(|(kind, _)| kind.priority());
        self
    }

    /// Registers `handler` for `POST /{id}/{name}`, replacing any earlier
    /// handler for the same name.
    #[must_use]
    pub fn action<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&Request, u32) -> Response + Send + Sync + 'static,
    {
        self.actions.retain(|(existing, _)| existing != name);
        self.actions.push((name.to_string(), Box::new(handler)));
        self
    }

    /// Builds the standard table for a CRUD-shaped resource.
    ///
    /// `ListByParent` is only registered when the resource names a parent relation.
    #[must_use]
    pub fn for_resource<R: Resource>(resource: Arc<R>) -> Self {
        let relation = resource.parent_relation().map(ToString::to_string);
        let has_parent = relation.is_some();

        let list = Arc::clone(&resource);
        let get = Arc::clone(&resource);
        let create = Arc::clone(&resource);
        let update = Arc::clone(&resource);
        let delete = Arc::clone(&resource);

        let mut table = Self::new(relation.as_deref())
            .route(RouteKind::ListAll, move |req, _| list.list(req))
            .route(RouteKind::GetById, move |req, params| match params.id {
                Some(id) => get.get(req, id),
                None => route_not_found(req),
            })
            .route(RouteKind::Create, move |req, _| create.create(req))
            .route(RouteKind::Update, move |req, params| match params.id {
                Some(id) => update.update(req, id),
                None => route_not_found(req),
            })
            .route(RouteKind::Delete, move |req, params| match params.id {
                Some(id) => delete.delete(req, id),
                None => route_not_found(req),
            });

        for name in resource.actions() {
            let actor = Arc::clone(&resource);
            let action = (*name).to_string();
            table = table.action(name, move |req, id| actor.act(req, id, &action));
        }

        if has_parent {
            table.route(RouteKind::ListByParent, move |req, params| {
                match params.parent_id {
                    Some(parent_id) => resource.list_by_parent(req, parent_id),
                    None => route_not_found(req),
                }
            })
        } else {
            table
        }
    }

    /// Registered route kinds, in match order.
    pub fn kinds(&self) -> impl Iterator<Item = RouteKind> + '_ {
        let actions = (!self.actions.is_empty()).then_some(RouteKind::Action);
        self.routes.iter().map(|(kind, _)| *kind).chain(actions)
    }

    /// Registered action names, in registration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.actions.iter().map(|(name, _)| name.as_str())
    }

    /// Selects the route for `(verb, path)` without invoking it.
    #[must_use]
    pub fn resolve(&self, verb: &str, path: &str) -> Resolution {
        let target = match PathShape::parse(path, self.parent_relation.as_deref()) {
            PathShape::Root => Target::Root,
            PathShape::Member(segment) => match IdSegment::parse(segment) {
                IdSegment::Positive(id) => Target::Id(id),
                IdSegment::Zero => Target::Nothing,
                IdSegment::Invalid => {
                    return Resolution::BadRequest("Invalid ID format".to_string())
                }
            },
            PathShape::Related { relation, key } => match IdSegment::parse(key) {
                IdSegment::Positive(id) => Target::Parent(id),
                IdSegment::Zero => Target::Nothing,
                IdSegment::Invalid => {
                    return Resolution::BadRequest(format!("Invalid {relation} ID format"))
                }
            },
            PathShape::Action { key, action } if self.has_action(action) => {
                match IdSegment::parse(key) {
                    IdSegment::Positive(id) => Target::Action(id, action),
                    IdSegment::Zero => Target::Nothing,
                    IdSegment::Invalid => {
                        return Resolution::BadRequest("Invalid ID format".to_string())
                    }
                }
            }
            PathShape::Action { .. } | PathShape::Unrouted => Target::Nothing,
        };

        self.kinds()
            .find_map(|kind| {
                kind.matches(verb, target)
                    .map(|params| Resolution::Matched { kind, params })
            })
            .unwrap_or(Resolution::NotFound)
    }

    fn has_action(&self, name: &str) -> bool {
        self.actions.iter().any(|(existing, _)| existing == name)
    }
}

impl RequestHandler for DispatchTable {
    fn handle(&self, request: &Request) -> Response {
        let resolution = self.resolve(request.verb(), request.path());
        debug!(
            correlation_id = %request.correlation_id(),
            verb = request.verb(),
            path = request.path(),
            ?resolution,
            "dispatching request"
        );

        match resolution {
            Resolution::Matched {
                kind: RouteKind::Action,
                params,
            } => {
                let handler = params.action.as_deref().and_then(|name| {
                    self.actions.iter().find(|(existing, _)| existing == name)
                });
                match (handler, params.id) {
                    (Some((_, handler)), Some(id)) => handler(request, id),
                    _ => route_not_found(request),
                }
            }
            Resolution::Matched { kind, params } => {
                match self.routes.iter().find(|(k, _)| *k == kind) {
                    Some((_, handler)) => handler(request, params),
                    None => route_not_found(request),
                }
            }
            Resolution::BadRequest(message) => {
                Response::error(request, status::BAD_REQUEST, &message)
            }
            Resolution::NotFound => route_not_found(request),
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("parent_relation", &self.parent_relation)
            .field("routes", &self.kinds().collect::<Vec<_>>())
            .field("actions", &self.action_names().collect::<Vec<_>>())
            .finish()
    }
}

fn route_not_found(request: &Request) -> Response {
    Response::error(request, status::NOT_FOUND, "Route not found")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn req(verb: &str, path: &str) -> Request {
        Request::builder(verb, path).build()
    }

    /// Echoes the matched route and ids in headers so tests can assert on them.
    struct EchoResource {
        relation: Option<&'static str>,
    }

    fn echo(request: &Request, route: &str, id: Option<u32>) -> Response {
        let resp = Response::reply(request, status::OK).with_header("x-route", route);
        match id {
            Some(id) => resp.with_header("x-id", id.to_string()),
            None => resp,
        }
    }

    impl Resource for EchoResource {
        fn parent_relation(&self) -> Option<&str> {
            self.relation
        }
        fn list(&self, request: &Request) -> Response {
            echo(request, "list", None)
        }
        fn get(&self, request: &Request, id: u32) -> Response {
            echo(request, "get", Some(id))
        }
        fn create(&self, request: &Request) -> Response {
            echo(request, "create", None)
        }
        fn update(&self, request: &Request, id: u32) -> Response {
            echo(request, "update", Some(id))
        }
        fn delete(&self, request: &Request, id: u32) -> Response {
            echo(request, "delete", Some(id))
        }
        fn list_by_parent(&self, request: &Request, parent_id: u32) -> Response {
            echo(request, "by-parent", Some(parent_id))
        }
    }

    fn echo_table(relation: Option<&'static str>) -> DispatchTable {
        DispatchTable::for_resource(Arc::new(EchoResource { relation }))
    }

    fn route_of(resp: &Response) -> Option<&str> {
        resp.headers().get("x-route").map(String::as_str)
    }

    #[test]
    fn empty_table_answers_root_with_not_found() {
        let table = DispatchTable::new(None);
        let resp = table.handle(&req("GET", "/"));
        assert_eq!(resp.status_code(), 404);
    }

    #[test]
    fn get_numeric_segment_dispatches_to_get_by_id() {
        let table = echo_table(None);
        assert_eq!(
            table.resolve("GET", "/42"),
            Resolution::Matched {
                kind: RouteKind::GetById,
                params: RouteParams {
                    id: Some(42),
                    ..RouteParams::default()
                },
            }
        );
        let resp = table.handle(&req("GET", "/42"));
        assert_eq!(route_of(&resp), Some("get"));
        assert_eq!(resp.headers().get("x-id").map(String::as_str), Some("42"));
    }

    #[test]
    fn non_numeric_id_is_bad_request() {
        let table = echo_table(None);
        let resp = table.handle(&req("GET", "/abc"));
        assert_eq!(resp.status_code(), 400);
        // Even a table with no routes rejects a malformed id.
        let resp = DispatchTable::new(None).handle(&req("GET", "/abc"));
        assert_eq!(resp.status_code(), 400);
    }

    #[test]
    fn verbs_select_their_routes() {
        let table = echo_table(None);
        let cases = [
            ("GET", "/", "list"),
            ("GET", "", "list"),
            ("POST", "/", "create"),
            ("PUT", "/7", "update"),
            ("DELETE", "/7", "delete"),
        ];
        for (verb, path, expected) in cases {
            let resp = table.handle(&req(verb, path));
            assert_eq!(route_of(&resp), Some(expected), "{verb} {path}");
        }
    }

    #[test]
    fn unmatched_verb_path_pairs_are_not_found() {
        let table = echo_table(None);
        for (verb, path) in [
            ("POST", "/7"),
            ("PUT", "/"),
            ("DELETE", "/"),
            ("PATCH", "/7"),
            ("get", "/"),
            ("GET", "/0"),
            ("GET", "/1/2/3"),
        ] {
            let resp = table.handle(&req(verb, path));
            assert_eq!(resp.status_code(), 404, "{verb} {path}");
        }
    }

    #[test]
    fn parent_listing_requires_configured_relation() {
        let with = echo_table(Some("patient"));
        let resp = with.handle(&req("GET", "/patient/9"));
        assert_eq!(route_of(&resp), Some("by-parent"));
        assert_eq!(resp.headers().get("x-id").map(String::as_str), Some("9"));

        let without = echo_table(None);
        assert_eq!(without.resolve("GET", "/patient/9"), Resolution::NotFound);
        assert!(!without.kinds().any(|k| k == RouteKind::ListByParent));
    }

    #[test]
    fn malformed_parent_id_names_the_relation() {
        let table = echo_table(Some("examination"));
        assert_eq!(
            table.resolve("GET", "/examination/x1"),
            Resolution::BadRequest("Invalid examination ID format".into())
        );
    }

    #[test]
    fn parent_listing_only_for_get() {
        let table = echo_table(Some("patient"));
        assert_eq!(table.resolve("DELETE", "/patient/9"), Resolution::NotFound);
    }

    #[test]
    fn routes_keep_priority_order_regardless_of_registration_order() {
        let table = DispatchTable::new(Some("p"))
            .route(RouteKind::ListByParent, |r, _| Response::reply(r, 200))
            .route(RouteKind::Delete, |r, _| Response::reply(r, 200))
            .route(RouteKind::ListAll, |r, _| Response::reply(r, 200));
        let kinds: Vec<_> = table.kinds().collect();
        assert_eq!(
            kinds,
            vec![RouteKind::ListAll, RouteKind::Delete, RouteKind::ListByParent]
        );
    }

    #[test]
    fn registered_actions_take_post_on_a_member() {
        let table = echo_table(Some("examination"))
            .action("validate", |r, id| echo(r, "validate", Some(id)));

        assert_eq!(
            table.resolve("POST", "/7/validate"),
            Resolution::Matched {
                kind: RouteKind::Action,
                params: RouteParams {
                    id: Some(7),
                    action: Some("validate".into()),
                    ..RouteParams::default()
                },
            }
        );
        let resp = table.handle(&req("POST", "/7/validate"));
        assert_eq!(route_of(&resp), Some("validate"));
        assert_eq!(resp.headers().get("x-id").map(String::as_str), Some("7"));

        assert_eq!(
            table.resolve("POST", "/x/validate"),
            Resolution::BadRequest("Invalid ID format".into())
        );
        assert_eq!(table.resolve("GET", "/7/validate"), Resolution::NotFound);
        assert_eq!(table.resolve("POST", "/7/archive"), Resolution::NotFound);
        assert_eq!(table.resolve("POST", "/0/validate"), Resolution::NotFound);
        // The relation literal still wins over an action reading.
        assert!(matches!(
            table.resolve("GET", "/examination/3"),
            Resolution::Matched {
                kind: RouteKind::ListByParent,
                ..
            }
        ));
        assert_eq!(table.kinds().last(), Some(RouteKind::Action));
    }

    #[test]
    fn resource_actions_are_registered_by_for_resource() {
        struct Flagged;
        impl Resource for Flagged {
            fn list(&self, r: &Request) -> Response {
                Response::reply(r, 200)
            }
            fn get(&self, r: &Request, _: u32) -> Response {
                Response::reply(r, 200)
            }
            fn create(&self, r: &Request) -> Response {
                Response::reply(r, 201)
            }
            fn update(&self, r: &Request, _: u32) -> Response {
                Response::reply(r, 200)
            }
            fn delete(&self, r: &Request, _: u32) -> Response {
                Response::reply(r, 204)
            }
            fn actions(&self) -> &[&str] {
                &["send"]
            }
            fn act(&self, r: &Request, id: u32, action: &str) -> Response {
                echo(r, action, Some(id))
            }
        }

        let table = DispatchTable::for_resource(Arc::new(Flagged));
        assert_eq!(table.action_names().collect::<Vec<_>>(), vec!["send"]);
        let resp = table.handle(&req("POST", "/4/send"));
        assert_eq!(route_of(&resp), Some("send"));
        assert_eq!(resp.headers().get("x-id").map(String::as_str), Some("4"));
    }

    #[test]
    fn re_registering_replaces_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let table = DispatchTable::new(None)
            .route(RouteKind::ListAll, |r, _| Response::reply(r, 500))
            .route(RouteKind::ListAll, move |r, _| {
                counted.fetch_add(1, Ordering::SeqCst);
                Response::reply(r, 200)
            });
        assert_eq!(table.kinds().count(), 1);
        assert_eq!(table.handle(&req("GET", "/")).status_code(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replies_carry_request_correlation_id() {
        let table = echo_table(None);
        for request in [req("GET", "/1"), req("GET", "/nope"), req("OPTIONS", "/")] {
            let resp = table.handle(&request);
            assert_eq!(resp.correlation_id(), request.correlation_id());
        }
    }
}
