// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#[cfg(test)]
mod policy_tests {
    //! # 访问策略回归测试套件
    //!
    //! 验证被屏蔽的用户和网址只会收到纯文本提示，代理不会去连接上游。

    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::{Notify, Semaphore},
        time::timeout,
    };
    use webproxy::{server, Config, Policy, ProxyHandler};

    async fn start_proxy(policy: Policy, cache_dir: &str) -> SocketAddr {
        let config = Config::new().with_cache_dir(cache_dir).with_policy(policy);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(ProxyHandler::new(&config));
        let pool = Arc::new(Semaphore::new(config.max_connections()));
        tokio::spawn(server::serve(listener, handler, pool, Arc::new(Notify::new())));
        addr
    }

    async fn send(proxy: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(proxy).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .expect("代理没有在规定时间内关闭连接")
            .unwrap();
        String::from_utf8_lossy(&response).to_string()
    }

    /// 在一段时间内源站没有收到任何连接
    async fn assert_no_upstream_connection(origin: &TcpListener) {
        let accepted = timeout(Duration::from_millis(300), origin.accept()).await;
        assert!(accepted.is_err(), "被拒绝的请求不应连接上游");
    }

    #[tokio::test]
    async fn test_banned_user_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let proxy = start_proxy(
            Policy::new().forbid_user("127.0.0.1"),
            dir.path().to_str().unwrap(),
        )
        .await;

        let request = format!(
            "GET http://127.0.0.1:{}/ HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
            port, port
        );
        assert_eq!(send(proxy, &request).await, "The current user has been banned\n");
        assert_no_upstream_connection(&origin).await;
    }

    /// 用户屏蔽在解析之前生效，格式错误的请求也会收到提示
    #[tokio::test]
    async fn test_banned_user_with_malformed_request() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = start_proxy(
            Policy::new().forbid_user("127.0.0.1"),
            dir.path().to_str().unwrap(),
        )
        .await;

        assert_eq!(
            send(proxy, "complete garbage\r\n\r\n").await,
            "The current user has been banned\n"
        );
    }

    #[tokio::test]
    async fn test_forbidden_site_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let target = format!("http://127.0.0.1:{}/secret", port);
        let proxy = start_proxy(
            Policy::new().forbid_site(&target),
            dir.path().to_str().unwrap(),
        )
        .await;

        let request = format!("GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", target, port);
        assert_eq!(
            send(proxy, &request).await,
            "This site is forbidden to be visited\n"
        );
        assert_no_upstream_connection(&origin).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// 网址屏蔽是精确匹配，只多一个字符的地址照常转发
    #[tokio::test]
    async fn test_forbidden_site_requires_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let banned = format!("http://127.0.0.1:{}/secret", port);
        let proxy = start_proxy(
            Policy::new().forbid_site(&banned),
            dir.path().to_str().unwrap(),
        )
        .await;

        let origin_task = tokio::spawn(async move {
            let (mut stream, _) = origin.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nopen").await.unwrap();
        });

        let request = format!(
            "GET {}s HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
            banned, port
        );
        assert_eq!(send(proxy, &request).await, "HTTP/1.1 200 OK\r\n\r\nopen");
        origin_task.await.unwrap();
    }

    /// 请求头超过上限时直接断开，不转发也不回复
    #[tokio::test]
    async fn test_oversized_header_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let proxy = start_proxy(Policy::new(), dir.path().to_str().unwrap()).await;

        let request = format!(
            "GET http://127.0.0.1:{}/ HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nX-Padding: {}\r\n\r\n",
            port,
            port,
            "A".repeat(100 * 1024)
        );
        assert_eq!(send(proxy, &request).await, "");
        assert_no_upstream_connection(&origin).await;
    }
}
