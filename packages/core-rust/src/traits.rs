use crate::envelope::{status, Request, Response};

/// The unit of work a worker runs for every request it consumes.
///
/// Implementations must be total: malformed input is answered with an error
/// response, never treated as fatal. The broker delivers at least once, so a
/// request may be redelivered after a worker crash; handlers whose side
/// effects must happen exactly once should be idempotent per correlation id.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// A CRUD-shaped collaborator that a dispatch table can route to.
///
/// Every method answers the request it is given; the dispatch table has
/// already validated that ids are positive.
pub trait Resource: Send + Sync + 'static {
    /// Literal path segment naming this resource's parent, e.g. `"patient"`
    /// for `/patient/{id}` listings. `None` disables parent-scoped listings.
    fn parent_relation(&self) -> Option<&str> {
        None
    }

    fn list(&self, request: &Request) -> Response;

    fn get(&self, request: &Request, id: u32) -> Response;

    fn create(&self, request: &Request) -> Response;

    fn update(&self, request: &Request, id: u32) -> Response;

    fn delete(&self, request: &Request, id: u32) -> Response;

    fn list_by_parent(&self, request: &Request, _parent_id: u32) -> Response {
        Response::error(request, status::NOT_FOUND, "Route not found")
    }

    /// Names accepted in `POST /{id}/{action}`, e.g. `["validate", "send"]`.
    fn actions(&self) -> &[&str] {
        &[]
    }

    /// Runs one of [`Resource::actions`] on the record `id`.
    fn act(&self, request: &Request, _id: u32, _action: &str) -> Response {
        Response::error(request, status::NOT_FOUND, "Route not found")
    }
}
