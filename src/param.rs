// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 代理协议参数与常量模块
//!
//! 该模块定义了代理遵循的 HTTP 相关常量和数据结构，包括：
//! - 请求报文中用到的分隔符与标记。
//! - 拒绝访问时返回给客户端的纯文本。
//! - 重新验证请求附带的固定标头集合。
//! - 代理识别的 HTTP 方法枚举。

use std::{fmt, time::Duration};

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 未指定端口时使用的默认端口
pub const DEFAULT_PORT: u16 = 80;

/// HTTPS 端口。代理不处理 TLS，发往该端口的请求被直接丢弃
pub const HTTPS_PORT: u16 = 443;

/// 识别 Host 标头所用的标记
pub const HOST_MARKER: &str = "Host: ";

/// 缓存记录中作为新鲜度令牌的行前缀
pub const DATE_MARKER: &str = "Date";

/// 上游返回“未修改”时使用的状态码
pub const NOT_MODIFIED: &str = "304";

/// 被屏蔽的用户收到的提示
pub const USER_BANNED_MESSAGE: &str = "The current user has been banned";

/// 访问被屏蔽的网址时收到的提示
pub const SITE_FORBIDDEN_MESSAGE: &str = "This site is forbidden to be visited";

/// 缓存记录文件的后缀名
pub const CACHE_FILE_SUFFIX: &str = "txt";

/// 关闭连接前最多丢弃的客户端剩余字节数
pub const DRAIN_LIMIT: u64 = 1024 * 1024;

/// 关闭连接前等待客户端结束发送的最长时间
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 重新验证请求中附带的固定标头，顺序即发送顺序。
pub const STANDARD_HEADERS: [(&str, &str); 6] = [
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("Accept-Encoding", "gzip, deflate, sdch"),
    ("Accept-Language", "zh-CN,zh;q=0.8"),
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.2 Safari/605.1.15",
    ),
    ("Encoding", "UTF-8"),
    ("Connection", "keep-alive"),
];

/// 代理能够识别的 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestMethod {
    /// 获取资源，唯一可以使用缓存的方法
    Get,
    /// 提交数据。请求体不会被转发
    Post,
    /// 建立隧道。代理不做特殊处理，按普通请求透传
    Connect,
}

impl HttpRequestMethod {
    /// 所有可识别的方法，用于在请求头中按子串查找请求行
    pub const ALL: [HttpRequestMethod; 3] = [
        HttpRequestMethod::Get,
        HttpRequestMethod::Post,
        HttpRequestMethod::Connect,
    ];

    /// 将请求行中的方法标记转换为枚举，不认识的方法返回 `None`
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(HttpRequestMethod::Get),
            "POST" => Some(HttpRequestMethod::Post),
            "CONNECT" => Some(HttpRequestMethod::Connect),
            _ => None,
        }
    }

    /// 报文中使用的大写方法名
    pub fn as_str(&self) -> &'static str {
        match *self {
            HttpRequestMethod::Get => "GET",
            HttpRequestMethod::Post => "POST",
            HttpRequestMethod::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_token() {
        assert_eq!(HttpRequestMethod::from_token("GET"), Some(HttpRequestMethod::Get));
        assert_eq!(HttpRequestMethod::from_token("POST"), Some(HttpRequestMethod::Post));
        assert_eq!(
            HttpRequestMethod::from_token("CONNECT"),
            Some(HttpRequestMethod::Connect)
        );
        assert_eq!(HttpRequestMethod::from_token("DELETE"), None);
        assert_eq!(HttpRequestMethod::from_token("get"), None);
    }

    #[test]
    fn test_method_display_roundtrip() {
        for method in HttpRequestMethod::ALL {
            assert_eq!(HttpRequestMethod::from_token(&method.to_string()), Some(method));
        }
    }

    #[test]
    fn test_standard_headers_end_with_keep_alive() {
        assert_eq!(STANDARD_HEADERS[0].0, "Accept");
        assert_eq!(STANDARD_HEADERS[5], ("Connection", "keep-alive"));
    }
}
