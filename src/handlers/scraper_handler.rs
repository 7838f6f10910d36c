// Operational endpoints: manual refresh, cache dumps, sensor health.
use crate::error::ScraperError;
use crate::scraper::VCenterScraper;
use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

/// `host,vm` -> ["host", "vm"]
fn sensor_names(path: &str) -> Vec<&str> {
    path.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn error_response(e: &ScraperError) -> HttpResponse {
    match e {
        ScraperError::SensorNotFound(_) => HttpResponse::NotFound().body(e.to_string()),
        ScraperError::SensorNotRunning(_) => HttpResponse::ServiceUnavailable().body(e.to_string()),
        _ => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

pub async fn refresh_sensor(
    path: web::Path<String>,
    scraper: web::Data<VCenterScraper>,
) -> impl Responder {
    let names = sensor_names(&path);
    match scraper.refresh_sensors(&names) {
        Ok(triggered) => {
            log::info!("[http] manual refresh of {:?}", triggered);
            HttpResponse::Ok().json(json!({ "triggered": triggered }))
        }
        Err(e) => {
            log::warn!("[http] refresh {} failed: {}", path.as_str(), e);
            error_response(&e)
        }
    }
}

pub async fn dump_sensor(
    path: web::Path<String>,
    scraper: web::Data<VCenterScraper>,
) -> impl Responder {
    match scraper.dump(&sensor_names(&path)) {
        Ok(dump) => HttpResponse::Ok().json(dump),
        Err(e) => error_response(&e),
    }
}

pub async fn sensor_metrics(scraper: web::Data<VCenterScraper>) -> impl Responder {
    HttpResponse::Ok().json(scraper.sensor_metrics())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/refresh/{sensor}")
            .route(web::get().to(refresh_sensor))
            .route(web::post().to(refresh_sensor)),
    )
    .service(web::resource("/dump/{sensor}").route(web::get().to(dump_sensor)))
    .service(web::resource("/sensors/metrics").route(web::get().to(sensor_metrics)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entity, host_only_config, FakeVSphere};
    use crate::vsphere::EntityKind;
    use actix_web::http::StatusCode;
    use actix_web::test::{call_and_read_body_json, call_service, init_service, TestRequest};
    use actix_web::App;
    use serde_json::Value;
    use std::sync::Arc;

    fn scraper() -> web::Data<VCenterScraper> {
        let fake = Arc::new(FakeVSphere::new());
        fake.set_inventory(
            EntityKind::Host,
            vec![entity(EntityKind::Host, "host-1", "esx01", None)],
        );
        web::Data::new(VCenterScraper::with_api(host_only_config(), fake).unwrap())
    }

    #[test]
    fn test_sensor_names() {
        assert_eq!(sensor_names("host, vm,,"), vec!["host", "vm"]);
        assert!(sensor_names("").is_empty());
    }

    #[actix_rt::test]
    async fn test_refresh_endpoint() {
        let scraper = scraper();
        scraper.start().await.unwrap();
        let app = init_service(
            App::new()
                .app_data(scraper.clone())
                .configure(configure),
        )
        .await;

        let req = TestRequest::post().uri("/refresh/esx").to_request();
        let body: Value = call_and_read_body_json(&app, req).await;
        assert_eq!(body["triggered"], json!(["host"]));

        let req = TestRequest::get().uri("/refresh/nope").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        scraper.stop().await;
    }

    #[actix_rt::test]
    async fn test_refresh_before_start() {
        let scraper = scraper();
        let app = init_service(
            App::new()
                .app_data(scraper.clone())
                .configure(configure),
        )
        .await;

        let req = TestRequest::get().uri("/refresh/host").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_rt::test]
    async fn test_dump_and_metrics_endpoints() {
        let scraper = scraper();
        scraper.start().await.unwrap();
        let app = init_service(
            App::new()
                .app_data(scraper.clone())
                .configure(configure),
        )
        .await;

        let req = TestRequest::get().uri("/dump/host").to_request();
        let body: Value = call_and_read_body_json(&app, req).await;
        assert_eq!(body["host"]["host-1"]["object"]["name"], "esx01");
        assert!(body["host"]["host-1"]["timestamp"].is_string());

        let req = TestRequest::get().uri("/sensors/metrics").to_request();
        let body: Value = call_and_read_body_json(&app, req).await;
        let metrics = body.as_array().unwrap();
        assert!(metrics
            .iter()
            .any(|m| m["sensor"] == "host" && m["name"] == "enabled" && m["value"] == 1.0));

        scraper.stop().await;
    }
}
