use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use tiny_http::{Header, Request, Response, ResponseBox, Server};

use quill::api::{Client, ClientConfig, NewComment, Registration};
use quill::comments;
use quill::config;
use quill::App;

const AUTHOR_JSON: &str = r#"{
    "userId": 7,
    "userName": "ada",
    "userEmail": "ada@example.com",
    "userTime": "2023-01-15T08:00:00",
    "userShow": "writes about compilers",
    "userImg": "default.jpg",
    "userConcern": 3,
    "userFans": 5
}"#;

fn article_json(id: i64, likes: i64) -> String {
    format!(
        r#"{{
            "article": {{
                "artId": {id},
                "artUserId": 7,
                "artTitle": "article {id}",
                "artTypeId": 1,
                "artContent": "body of {id}",
                "artCreTime": "2024-05-01T10:00:00",
                "artLikeNum": {likes}
            }},
            "user": {AUTHOR_JSON}
        }}"#
    )
}

// Serves canned responses on an ephemeral port; each test brings its own
// handler.
struct TestServer {
    base_url: String,
    inner: Arc<Server>,
}

impl TestServer {
    fn start<F>(handler: F) -> Self
    where
        F: Fn(&mut Request) -> ResponseBox + Send + Sync + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind test server"));
        let base_url = format!("http://{}/", server.server_addr());
        let background = Arc::clone(&server);
        thread::spawn(move || {
            for mut request in background.incoming_requests() {
                let response = handler(&mut request);
                let _ = request.respond(response);
            }
        });
        TestServer {
            base_url,
            inner: server,
        }
    }

    fn client(&self) -> Client {
        Client::new(ClientConfig {
            base_url: Some(self.base_url.clone()),
            user_agent: "quill-test/0".to_string(),
            timeout: Some(Duration::from_secs(5)),
            http_client: None,
        })
        .expect("build client")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.inner.unblock();
    }
}

fn json(body: impl Into<String>) -> ResponseBox {
    Response::from_string(body.into())
        .with_header(
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("valid header"),
        )
        .boxed()
}

fn text(body: &str) -> ResponseBox {
    Response::from_string(body).boxed()
}

fn error(code: u16) -> ResponseBox {
    Response::from_string("boom").with_status_code(code).boxed()
}

fn path_of(request: &Request) -> String {
    request.url().split('?').next().unwrap_or("").to_string()
}

fn read_body(request: &mut Request) -> String {
    let mut body = String::new();
    let _ = request.as_reader().read_to_string(&mut body);
    body
}

#[test]
fn feed_page_decodes_spring_envelope() {
    let (tx, rx) = unbounded();
    let server = TestServer::start(move |request| {
        tx.send(request.url().to_string()).expect("record url");
        json(format!(
            r#"{{"content": [{}], "number": 0, "size": 20, "totalPages": 3, "last": false}}"#,
            article_json(3, 4)
        ))
    });

    let page = server.client().latest_articles(0, 20).expect("fetch page");
    assert_eq!(page.total_pages, 3);
    assert!(!page.last);
    assert_eq!(page.content.len(), 1);
    let entry = &page.content[0];
    assert_eq!(entry.article.id, 3);
    assert_eq!(entry.article.like_count, Some(4));
    assert_eq!(entry.author.name, "ada");

    let url = rx.recv().expect("one request");
    assert!(url.starts_with("/api/articles/get-new?"), "url was {url}");
    assert!(url.contains("page=0"));
    assert!(url.contains("size=20"));
}

#[test]
fn article_detail_decodes_nested_author() {
    let server = TestServer::start(|_request| json(article_json(5, 9)));
    let entry = server.client().article_detail(5).expect("detail");
    assert_eq!(entry.article.id, 5);
    assert_eq!(entry.article.like_count, Some(9));
    assert_eq!(entry.author.id, 7);
}

#[test]
fn toggle_reports_state_from_the_body() {
    let (tx, rx) = unbounded();
    let server = TestServer::start(move |request| {
        tx.send((request.method().to_string(), request.url().to_string()))
            .expect("record request");
        text("unliked:200")
    });

    let liked = server.client().toggle_like(7, 3).expect("toggle");
    assert!(!liked);

    let (method, url) = rx.recv().expect("one request");
    assert_eq!(method, "POST");
    assert!(url.starts_with("/api/article-likes/toggle?"), "url was {url}");
    assert!(url.contains("userId=7"));
    assert!(url.contains("articleId=3"));
}

#[test]
fn toggle_error_body_is_rejected_despite_http_200() {
    let server = TestServer::start(|_request| text("error"));
    let err = server.client().toggle_like(7, 3).unwrap_err();
    assert!(err.to_string().contains("toggle rejected"), "err was {err}");
}

#[test]
fn like_acks_200_and_surfaces_server_errors() {
    let server = TestServer::start(|request| match path_of(request).as_str() {
        "/api/article-likes/like" => text("200"),
        "/api/article-likes/unlike" => error(500),
        _ => error(404),
    });

    let client = server.client();
    client.like(7, 3).expect("like acked");
    let err = client.unlike(7, 3).unwrap_err();
    assert!(err.to_string().contains("api: error"), "err was {err}");
}

#[test]
fn status_parses_boolean_body() {
    let server = TestServer::start(|_request| text("true"));
    assert!(server.client().like_status(7, 3).expect("status"));
}

#[test]
fn count_tolerates_empty_body() {
    let server = TestServer::start(|_request| text(""));
    assert_eq!(server.client().like_count(3).expect("count"), 0);
}

#[test]
fn unauthorized_maps_to_a_clean_error() {
    let server = TestServer::start(|_request| error(401));
    let err = server.client().like_status(7, 3).unwrap_err();
    assert_eq!(err.to_string(), "api: unauthorized");
}

#[test]
fn login_posts_multipart_credentials() {
    let (tx, rx) = unbounded();
    let server = TestServer::start(move |request| {
        tx.send(read_body(request)).expect("record body");
        json(AUTHOR_JSON)
    });

    let author = server
        .client()
        .login("ada@example.com", "hunter2")
        .expect("login");
    assert_eq!(author.id, 7);
    assert_eq!(author.name, "ada");

    let body = rx.recv().expect("one request");
    assert!(body.contains("name=\"email\""), "body was {body}");
    assert!(body.contains("ada@example.com"));
    assert!(body.contains("name=\"password\""));
    assert!(body.contains("hunter2"));
}

#[test]
fn register_returns_the_new_id() {
    let (tx, rx) = unbounded();
    let server = TestServer::start(move |request| {
        tx.send(read_body(request)).expect("record body");
        text("31")
    });

    let registration = Registration {
        name: "ada".to_string(),
        password: "hunter2".to_string(),
        bio: String::new(),
        email: "ada@example.com".to_string(),
    };
    let id = server.client().register(&registration).expect("register");
    assert_eq!(id, 31);

    let body = rx.recv().expect("one request");
    assert!(body.contains("name=\"userName\""), "body was {body}");
    assert!(body.contains("name=\"userEmail\""));
    assert!(body.contains("name=\"userPassword\""));
}

#[test]
fn create_comment_posts_json_body() {
    let (tx, rx) = unbounded();
    let server = TestServer::start(move |request| {
        tx.send(read_body(request)).expect("record body");
        json(
            r#"{
                "commentId": 9,
                "articleId": 3,
                "articleTitle": "article 3",
                "userId": 7,
                "userName": "ada",
                "commentContent": "nice",
                "commentTime": "2024-05-01T12:00:00",
                "parentCommentId": null
            }"#,
        )
    });

    let created = server
        .client()
        .create_comment(&NewComment {
            article_id: 3,
            user_id: 7,
            content: "nice".to_string(),
        })
        .expect("create comment");
    assert_eq!(created.id, 9);

    let sent: serde_json::Value =
        serde_json::from_str(&rx.recv().expect("one request")).expect("json body");
    assert_eq!(sent["articleId"], 3);
    assert_eq!(sent["userId"], 7);
    assert_eq!(sent["content"], "nice");
}

#[test]
fn comment_thread_resolves_over_the_wire() {
    let server = TestServer::start(|_request| {
        json(
            r#"[
                {"commentId": 2, "articleId": 3, "userId": 8, "userName": "lin",
                 "commentContent": "replying", "commentTime": "2024-05-01T11:00:00",
                 "parentCommentId": 1},
                {"commentId": 1, "articleId": 3, "userId": 7, "userName": "ada",
                 "commentContent": "first thought", "commentTime": "2024-05-01T10:00:00",
                 "parentCommentId": null}
            ]"#,
        )
    });

    let raw = server.client().comments_for_article(3).expect("list comments");
    let thread = comments::resolve(raw);

    let ids: Vec<i64> = thread.iter().map(|comment| comment.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(thread[1].parent_excerpt.as_deref(), Some("first thought"));
    assert_eq!(thread[1].parent_author.as_deref(), Some("ada"));
}

#[test]
fn login_then_toggle_over_http() {
    let server = TestServer::start(|request| match path_of(request).as_str() {
        "/api/user/login" => {
            let _ = read_body(request);
            json(AUTHOR_JSON)
        }
        "/api/article-likes/toggle" => text("liked:200"),
        _ => error(404),
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config::Config::default();
    cfg.server.base_url = server.base_url.clone();
    cfg.storage.path = Some(dir.path().join("state.db"));

    let app = App::open(cfg).expect("open app");
    let identity = app.login("ada@example.com", "hunter2").expect("login");
    assert_eq!(identity.id, 7);

    let settled = app.coordinator().toggle(3).expect("toggle");
    assert_eq!(settled.liked, Some(true));
    assert_eq!(settled.like_count, 1);

    app.close().expect("close app");
}
