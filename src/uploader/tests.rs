//! Tests for the upload endpoint.

#[cfg(test)]
mod uploader_tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use crate::parser::{find_head_end, parse_head, read_body, BodyKind, BodyOptions, HttpRequest, Part, PartData};
    use crate::server::{Error, HttpResponse, ResponseBody, Router, ServerConfig, StatusCode};
    use crate::uploader::{UploadEvent, Uploader};

    const BOUNDARY: &str = "----localserveBoundary";

    fn scratch_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("localserve-uploader-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn multipart(files: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"note\"\r\n\r\nfrom the tests\r\n");
        for (filename, data) in files {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n").as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    /// Build a request the way a connection would, body included.
    async fn request(method: &str, target: &str, kind: BodyKind, body: &[u8]) -> HttpRequest {
        request_in(method, target, kind, body, &BodyOptions::default()).await
    }

    async fn request_in(method: &str, target: &str, kind: BodyKind, body: &[u8], options: &BodyOptions) -> HttpRequest {
        let raw = format!(
            "{method} {target} HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let end = find_head_end(raw.as_bytes()).unwrap();
        let head = parse_head(&raw.as_bytes()[..end]).unwrap();
        let body = read_body(body, &head.headers, kind, options).await.unwrap();
        HttpRequest::from_head(head, body)
    }

    fn json_body(response: &HttpResponse) -> serde_json::Value {
        match &response.body {
            ResponseBody::Data(data) => serde_json::from_slice(data).unwrap(),
            other => panic!("expected a data body, got {other:?}"),
        }
    }

    fn mounted(uploader: Uploader) -> Router {
        let mut router = Router::new();
        Arc::new(uploader).mount(&mut router, "/books").unwrap();
        router
    }

    fn part(filename: &str, data: &[u8]) -> Part {
        Part {
            name: "file".to_string(),
            filename: Some(filename.to_string()),
            content_type: None,
            data: PartData::Bytes(data.to_vec()),
        }
    }

    #[tokio::test]
    async fn test_upload_stores_files_and_reports_them() {
        let root = scratch_root("store");
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let router = mounted(Uploader::new(&root).with_hook(move |e| seen.lock().unwrap().push(e.clone())));

        let body = multipart(&[("War and Peace.txt", "Well, Prince")]);
        let response = router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &body).await)
            .await;

        assert_eq!(response.status, StatusCode::Created);
        let summary = json_body(&response);
        let file = &summary["files"][0];
        assert_eq!(file["field"], "file");
        assert_eq!(file["originalName"], "War and Peace.txt");
        assert_eq!(file["storedName"], "War and Peace.txt");
        assert_eq!(file["size"], 12);

        let stored = root.join("War and Peace.txt");
        assert_eq!(std::fs::read(&stored).unwrap(), b"Well, Prince");
        assert_eq!(*events.lock().unwrap(), vec![UploadEvent::Uploaded(stored)]);
    }

    #[tokio::test]
    async fn test_staged_parts_are_moved_into_the_root() {
        let root = scratch_root("staged");
        let staging = scratch_root("staging");
        let options = BodyOptions {
            temp_dir: staging.clone(),
            ..BodyOptions::default()
        };
        let router = mounted(Uploader::new(&root));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("notes.txt"), b"older").unwrap();

        let body = multipart(&[("notes.txt", "newer notes"), ("other.txt", "x")]);
        let req = request_in("POST", "/books/upload", BodyKind::MultipartForm, &body, &options).await;
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 2);

        let response = router.dispatch(req).await;
        assert_eq!(response.status, StatusCode::Created);
        assert_eq!(json_body(&response)["files"][0]["storedName"], "notes-1.txt");
        assert_eq!(json_body(&response)["files"][0]["size"], 11);
        assert_eq!(std::fs::read(root.join("notes.txt")).unwrap(), b"older");
        assert_eq!(std::fs::read(root.join("notes-1.txt")).unwrap(), b"newer notes");
        assert_eq!(std::fs::read(root.join("other.txt")).unwrap(), b"x");
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_upload_leaves_no_staged_files() {
        let root = scratch_root("staged-rejected");
        let staging = scratch_root("staging-rejected");
        let options = BodyOptions {
            temp_dir: staging.clone(),
            ..BodyOptions::default()
        };
        let router = mounted(Uploader::new(&root));

        let body = multipart(&[("fine.txt", "ok"), ("../bad.txt", "no")]);
        let req = request_in("POST", "/books/upload", BodyKind::MultipartForm, &body, &options).await;
        let response = router.dispatch(req).await;
        assert_eq!(response.status, StatusCode::BadRequest);
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
        assert!(!root.join("fine.txt").exists());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_the_same_name_never_overwrite() {
        let root = scratch_root("collide");
        let uploader = Uploader::new(&root);
        let first = part("photo.jpg", b"first");
        let second = part("photo.jpg", b"second");

        let (a, b) = tokio::join!(
            uploader.store_part(first, "photo.jpg"),
            uploader.store_part(second, "photo.jpg")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.stored_name, b.stored_name);
        let mut names = vec![a.stored_name.clone(), b.stored_name.clone()];
        names.sort();
        assert_eq!(names, vec!["photo-1.jpg", "photo.jpg"]);
        assert_eq!(std::fs::read(root.join(&a.stored_name)).unwrap(), b"first");
        assert_eq!(std::fs::read(root.join(&b.stored_name)).unwrap(), b"second");

        let third = uploader.store_part(part("photo.jpg", b"third"), "photo.jpg").await.unwrap();
        assert_eq!(third.stored_name, "photo-2.jpg");
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let root = scratch_root("traversal");
        let router = mounted(Uploader::new(root.join("inner")));

        let body = multipart(&[("../escape.txt", "gotcha")]);
        let response = router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &body).await)
            .await;

        assert_eq!(response.status, StatusCode::BadRequest);
        assert!(response.is_error());
        assert!(!root.join("escape.txt").exists());
        assert!(!root.join("inner").join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_rejected_part_stores_nothing() {
        let root = scratch_root("all-or-nothing");
        let router = mounted(Uploader::new(&root));

        let body = multipart(&[("good.txt", "fine"), (".profile", "sneaky")]);
        let response = router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &body).await)
            .await;

        assert_eq!(response.status, StatusCode::BadRequest);
        assert!(!root.join("good.txt").exists());
    }

    #[tokio::test]
    async fn test_extension_allow_list() {
        let root = scratch_root("extensions");
        let router = mounted(Uploader::new(&root).with_allowed_extensions(["txt", ".EPUB"]));

        let body = multipart(&[("cover.png", "PNG")]);
        let response = router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &body).await)
            .await;
        assert_eq!(response.status, StatusCode::Forbidden);
        assert!(!root.join("cover.png").exists());

        let body = multipart(&[("Book.TXT", "chapter one"), ("novel.epub", "PK")]);
        let response = router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &body).await)
            .await;
        assert_eq!(response.status, StatusCode::Created);
        assert!(root.join("Book.TXT").exists());
        assert!(root.join("novel.epub").exists());
    }

    #[tokio::test]
    async fn test_upload_without_files_is_bad_request() {
        let root = scratch_root("empty");
        let router = mounted(Uploader::new(&root));

        let response = router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &multipart(&[])).await)
            .await;
        assert_eq!(response.status, StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn test_list_download_and_delete() {
        let root = scratch_root("lifecycle");
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let router = mounted(Uploader::new(&root).with_hook(move |e| seen.lock().unwrap().push(e.clone())));

        let body = multipart(&[("b.txt", "bee"), ("a.txt", "ay!")]);
        router
            .dispatch(request("POST", "/books/upload", BodyKind::MultipartForm, &body).await)
            .await;
        std::fs::write(root.join(".DS_Store"), b"junk").unwrap();

        let listing = router.dispatch(request("GET", "/books/list", BodyKind::Data, b"").await).await;
        assert_eq!(listing.status, StatusCode::Ok);
        assert_eq!(
            json_body(&listing),
            serde_json::json!({"files": [{"name": "a.txt", "size": 3}, {"name": "b.txt", "size": 3}]})
        );

        let download = router.dispatch(request("GET", "/books/download/a.txt", BodyKind::Data, b"").await).await;
        assert_eq!(download.status, StatusCode::Ok);
        assert_eq!(download.headers.get("Content-Disposition"), Some("attachment; filename=\"a.txt\""));
        match &download.body {
            ResponseBody::File(file) => assert_eq!(file.path, root.join("a.txt")),
            other => panic!("expected a file body, got {other:?}"),
        }

        let deleted = router.dispatch(request("POST", "/books/delete/a.txt", BodyKind::Data, b"").await).await;
        assert_eq!(deleted.status, StatusCode::Ok);
        assert_eq!(json_body(&deleted), serde_json::json!({"deleted": "a.txt"}));
        assert!(!root.join("a.txt").exists());
        assert_eq!(events.lock().unwrap().last(), Some(&UploadEvent::Deleted(root.join("a.txt"))));

        let again = router.dispatch(request("POST", "/books/delete/a.txt", BodyKind::Data, b"").await).await;
        assert_eq!(again.status, StatusCode::NotFound);

        let missing = router.dispatch(request("GET", "/books/download/a.txt", BodyKind::Data, b"").await).await;
        assert_eq!(missing.status, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn test_list_of_missing_root_is_empty() {
        let uploader = Uploader::new(scratch_root("never-created"));
        assert!(uploader.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_from_config_uses_upload_root() {
        let config = ServerConfig::from_json_str(r#"{"uploadRootDirectory": "/srv/library"}"#).unwrap();
        let uploader = Uploader::from_config(&config);
        assert_eq!(uploader.root(), std::path::Path::new("/srv/library"));
    }

    #[tokio::test]
    async fn test_delete_rejects_unsafe_names() {
        let uploader = Uploader::new(scratch_root("delete-unsafe"));
        assert!(matches!(uploader.delete("..").await, Err(Error::InvalidFilename(_))));
    }

    #[tokio::test]
    async fn test_move_and_create_are_refused_by_default() {
        let root = scratch_root("refused");
        let uploader = Uploader::new(&root);
        uploader.store_part(part("a.txt", b"ay"), "a.txt").await.unwrap();
        let router = mounted(uploader);

        let moved = router
            .dispatch(request("POST", "/books/move", BodyKind::UrlEncodedForm, b"from=a.txt&to=b.txt").await)
            .await;
        assert_eq!(moved.status, StatusCode::Forbidden);
        assert!(root.join("a.txt").exists());
        assert!(!root.join("b.txt").exists());

        let created = router
            .dispatch(request("POST", "/books/create", BodyKind::UrlEncodedForm, b"name=shelf").await)
            .await;
        assert_eq!(created.status, StatusCode::Forbidden);
        assert!(!root.join("shelf").exists());
    }

    #[tokio::test]
    async fn test_enabled_move_renames_without_replacing() {
        let root = scratch_root("move");
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let uploader = Uploader::new(&root)
            .with_move(true)
            .with_hook(move |e| seen.lock().unwrap().push(e.clone()));
        uploader.store_part(part("a.txt", b"ay"), "a.txt").await.unwrap();
        uploader.store_part(part("c.txt", b"see"), "c.txt").await.unwrap();
        let router = mounted(uploader);

        let moved = router
            .dispatch(request("POST", "/books/move", BodyKind::UrlEncodedForm, b"from=a.txt&to=b+2.txt").await)
            .await;
        assert_eq!(moved.status, StatusCode::Ok);
        assert_eq!(json_body(&moved), serde_json::json!({"moved": "b 2.txt"}));
        assert_eq!(std::fs::read(root.join("b 2.txt")).unwrap(), b"ay");
        assert!(!root.join("a.txt").exists());
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&UploadEvent::Moved {
                from: root.join("a.txt"),
                to: root.join("b 2.txt"),
            })
        );

        let taken = router
            .dispatch(request("POST", "/books/move", BodyKind::UrlEncodedForm, b"from=c.txt&to=b+2.txt").await)
            .await;
        assert_eq!(taken.status, StatusCode::Conflict);
        assert_eq!(std::fs::read(root.join("b 2.txt")).unwrap(), b"ay");
        assert_eq!(std::fs::read(root.join("c.txt")).unwrap(), b"see");

        let missing = router
            .dispatch(request("POST", "/books/move", BodyKind::UrlEncodedForm, b"from=gone.txt&to=d.txt").await)
            .await;
        assert_eq!(missing.status, StatusCode::NotFound);
        assert!(!root.join("d.txt").exists());

        let escape = router
            .dispatch(request("POST", "/books/move", BodyKind::UrlEncodedForm, b"from=c.txt&to=..%2Fc.txt").await)
            .await;
        assert_eq!(escape.status, StatusCode::BadRequest);
        assert!(root.join("c.txt").exists());
    }

    #[tokio::test]
    async fn test_enabled_create_directory() {
        let root = scratch_root("mkdir");
        let router = mounted(Uploader::new(&root).with_create_directory(true));

        let created = router
            .dispatch(request("POST", "/books/create", BodyKind::UrlEncodedForm, b"name=Poetry").await)
            .await;
        assert_eq!(created.status, StatusCode::Created);
        assert_eq!(json_body(&created), serde_json::json!({"created": "Poetry"}));
        assert!(root.join("Poetry").is_dir());

        let again = router
            .dispatch(request("POST", "/books/create", BodyKind::UrlEncodedForm, b"name=Poetry").await)
            .await;
        assert_eq!(again.status, StatusCode::Conflict);

        // Directories are not listed as stored files.
        let listing = router.dispatch(request("GET", "/books/list", BodyKind::Data, b"").await).await;
        assert_eq!(json_body(&listing), serde_json::json!({"files": []}));
    }
}
