use crate::routes::health;
use crate::routes::v1;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "mailjob-server",
    description = "Asynchronous email job API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(v1::api_docs());
    root
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn docs_cover_job_routes() {
        let docs = get_docs();
        for path in ["/health", "/v1/jobs", "/v1/jobs/{id}", "/v1/jobs/{id}/cancel", "/v1/jobs/{id}/stream"] {
            assert!(docs.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
