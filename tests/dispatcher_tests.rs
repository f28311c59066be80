//! Dispatcher behaviour: middleware order, abort, groups, 404 and static files.

use std::time::Duration;

use axum::http::{Method, StatusCode};
use futures_util::FutureExt;
use waypoint::{handler_fn, middleware_fn, Context, Engine, Flow};

mod common;
use common::{entries, Journal, Mark};

async fn dispatch(engine: &Engine, method: Method, uri: &str) -> Context {
    let mut ctx = Context::new(method, uri.parse().unwrap());
    engine.handle_request(&mut ctx).await;
    ctx
}

fn endpoint(journal: &Journal) -> impl waypoint::Handler {
    let journal = journal.clone();
    handler_fn(move |ctx| {
        let journal = journal.clone();
        async move {
            journal.lock().unwrap().push("H".to_string());
            ctx.string(StatusCode::OK, "handled");
        }
        .boxed()
    })
}

#[tokio::test]
async fn test_global_then_group_then_route() {
    let journal = Journal::default();
    let mut engine = Engine::bare("svc");
    engine
        .use_middleware(Mark::pass("A", &journal))
        .use_middleware(Mark::pass("B", &journal));
    engine
        .group("/v1")
        .use_middleware(Mark::pass("C", &journal))
        .get("/items", endpoint(&journal))
        .unwrap();

    let ctx = dispatch(&engine, Method::GET, "/v1/items").await;
    assert_eq!(ctx.status_code(), StatusCode::OK);
    assert_eq!(entries(&journal), ["A", "B", "C", "H"]);
}

#[tokio::test]
async fn test_abort_stops_group_and_route() {
    let journal = Journal::default();
    let mut engine = Engine::bare("svc");
    engine
        .use_middleware(Mark::pass("A", &journal))
        .use_middleware(Mark::abort("B", &journal));
    engine
        .group("/v1")
        .use_middleware(Mark::pass("C", &journal))
        .get("/items", endpoint(&journal))
        .unwrap();

    let ctx = dispatch(&engine, Method::GET, "/v1/items").await;
    assert_eq!(ctx.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(ctx.response_body().as_ref(), br#"{"message":"B"}"#);
    assert_eq!(entries(&journal), ["A", "B"]);
}

#[tokio::test]
async fn test_group_middleware_only_under_prefix() {
    let journal = Journal::default();
    let mut engine = Engine::bare("svc");
    engine.get("/open", endpoint(&journal)).unwrap();
    engine
        .group("/admin")
        .use_middleware(Mark::abort("guard", &journal))
        .get("/panel", endpoint(&journal))
        .unwrap();

    let ctx = dispatch(&engine, Method::GET, "/open").await;
    assert_eq!(ctx.status_code(), StatusCode::OK);

    let ctx = dispatch(&engine, Method::GET, "/admin/panel").await;
    assert_eq!(ctx.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(entries(&journal), ["H", "guard"]);
}

#[tokio::test]
async fn test_nested_groups_accumulate_middleware() {
    let journal = Journal::default();
    let mut engine = Engine::bare("svc");
    {
        let mut api = engine.group("/api");
        api.use_middleware(Mark::pass("api", &journal));
        api.group("/v2")
            .use_middleware(Mark::pass("v2", &journal))
            .get("/users/:id", endpoint(&journal))
            .unwrap();
    }

    let ctx = dispatch(&engine, Method::GET, "/api/v2/users/5").await;
    assert_eq!(ctx.param("id"), Some("5"));
    assert_eq!(ctx.pattern(), Some("/api/v2/users/:id"));
    assert_eq!(entries(&journal), ["api", "v2", "H"]);
}

#[tokio::test]
async fn test_not_found_still_runs_middleware() {
    let journal = Journal::default();
    let mut engine = Engine::bare("svc");
    engine.use_middleware(Mark::pass("A", &journal));
    engine.get("/known", endpoint(&journal)).unwrap();

    let ctx = dispatch(&engine, Method::GET, "/unknown/path").await;
    assert_eq!(ctx.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(ctx.response_body().as_ref(), b"NOT FOUND URL /unknown/path");
    assert_eq!(entries(&journal), ["A"]);
}

#[tokio::test]
async fn test_literal_route_beats_param_route() {
    let mut engine = Engine::bare("svc");
    engine.get("/user/:id", common::text("param")).unwrap();
    engine.get("/user/profile", common::text("literal")).unwrap();

    let ctx = dispatch(&engine, Method::GET, "/user/profile").await;
    assert_eq!(ctx.response_body().as_ref(), b"literal");

    let ctx = dispatch(&engine, Method::GET, "/user/42").await;
    assert_eq!(ctx.response_body().as_ref(), b"param");
}

#[tokio::test]
async fn test_middleware_sees_route_params() {
    let mut engine = Engine::bare("svc");
    engine.use_middleware(middleware_fn(|ctx, next| {
        async move {
            let id = ctx.param("id").map(str::to_string);
            if id.as_deref() == Some("0") {
                return ctx.fail(StatusCode::BAD_REQUEST, "id must be positive");
            }
            next.run(ctx).await
        }
        .boxed()
    }));
    engine.get("/orders/:id", common::text("order")).unwrap();

    let ctx = dispatch(&engine, Method::GET, "/orders/0").await;
    assert_eq!(ctx.status_code(), StatusCode::BAD_REQUEST);

    let ctx = dispatch(&engine, Method::GET, "/orders/3").await;
    assert_eq!(ctx.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_admission_stack_through_engine() {
    let mut config = common::test_config();
    config.system.timeout_ms = 10;
    let mut engine = Engine::new(&config);
    engine.get("/slow", common::slow(Duration::from_millis(50))).unwrap();
    engine
        .get(
            "/boom",
            handler_fn(|_ctx| async move { panic!("kaboom") }.boxed()),
        )
        .unwrap();
    engine
        .get(
            "/who",
            handler_fn(|ctx| {
                async move {
                    let body = format!("{}:{}", ctx.service_name(), !ctx.trace_id().is_empty());
                    ctx.string(StatusCode::OK, body);
                }
                .boxed()
            }),
        )
        .unwrap();

    let ctx = dispatch(&engine, Method::GET, "/slow").await;
    assert_eq!(ctx.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ctx.response_body().as_ref(), br#"{"message":"request timeout"}"#);

    let ctx = dispatch(&engine, Method::GET, "/boom").await;
    assert_eq!(ctx.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ctx.response_body().as_ref(), br#"{"message":"Internal Server Error"}"#);

    let ctx = dispatch(&engine, Method::GET, "/who").await;
    assert_eq!(ctx.response_body().as_ref(), b"waypoint-test:true");
}

#[tokio::test]
async fn test_flow_of_bare_endpoint_is_continue() {
    let mut engine = Engine::bare("svc");
    engine.use_middleware(middleware_fn(|ctx, next| {
        async move {
            let flow = next.run(ctx).await;
            assert_eq!(flow, Flow::Continue);
            flow
        }
        .boxed()
    }));
    engine.get("/", common::text("root")).unwrap();

    let ctx = dispatch(&engine, Method::GET, "/").await;
    assert_eq!(ctx.response_body().as_ref(), b"root");
}

#[tokio::test]
async fn test_static_files() {
    let root = std::env::temp_dir().join(format!("waypoint-static-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(root.join("css")).unwrap();
    std::fs::write(root.join("css/site.css"), "body{}").unwrap();

    let mut engine = Engine::bare("svc");
    engine.group("/web").static_files("/assets/", &root).unwrap();
    assert!(engine
        .routes()
        .contains(&(&Method::GET, "/web/assets/*filepath")));

    let ctx = dispatch(&engine, Method::GET, "/web/assets/css/site.css").await;
    assert_eq!(ctx.status_code(), StatusCode::OK);
    assert_eq!(ctx.header("content-type"), Some("text/css; charset=utf-8"));
    assert_eq!(ctx.response_body().as_ref(), b"body{}");

    let ctx = dispatch(&engine, Method::GET, "/web/assets/css/missing.css").await;
    assert_eq!(ctx.status_code(), StatusCode::NOT_FOUND);

    let ctx = dispatch(&engine, Method::GET, "/web/assets/../secret").await;
    assert_eq!(ctx.status_code(), StatusCode::NOT_FOUND);

    std::fs::remove_dir_all(&root).unwrap();
}
