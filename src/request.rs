// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求解析模块
//!
//! 该模块把客户端发来的原始请求头（以空行结束，不含请求体）解析为 `Request`。
//!
//! 解析是宽松的、基于子串的：
//! 1. 第一个包含 `GET`/`POST`/`CONNECT` 的行被视为请求行，按空白切分为方法、目标地址、版本。
//! 2. 第一个包含 `Host: ` 的行给出主机名，去掉末尾的 `:端口`。
//! 3. 端口从目标地址中按冒号切分得到，找不到时默认为 80。
//!
//! 格式错误的请求行不会报错，缺失的字段保持为空，由下游决定使用默认值还是断开连接。

use crate::{param::*, policy::Policy};

/// 一次连接中解析出的请求元数据。
///
/// 原始请求头被完整保留，用于原样（或重定向改写后）转发给上游。
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// 请求行中的方法标记（原样保留）
    method: Option<String>,
    /// 访问地址，可以是绝对 URI 也可以是相对路径，同时也是缓存键
    target: Option<String>,
    /// 协议版本标记，如 `HTTP/1.1`
    version: Option<String>,
    /// 上游主机名（不含端口）
    host: Option<String>,
    /// 上游端口
    port: u16,
    /// 原始请求头
    raw: String,
    /// 是否已被重定向策略改写
    redirected: bool,
}

impl Request {
    /// 解析原始请求头。请求头为空时返回 `None`。
    pub fn parse(header: &str) -> Option<Self> {
        if header.is_empty() {
            return None;
        }

        let mut request = Self {
            method: None,
            target: None,
            version: None,
            host: None,
            port: DEFAULT_PORT,
            raw: header.to_string(),
            redirected: false,
        };

        let mut port = None;
        for line in header.lines() {
            if request.method.is_none() && is_request_line(line) {
                // 请求行：方法 目标地址 版本
                let mut parts = line.split_whitespace();
                request.method = parts.next().map(str::to_string);
                request.target = parts.next().map(str::to_string);
                request.version = parts.next().map(str::to_string);
                port = request
                    .target
                    .as_deref()
                    .and_then(port_segment)
                    .and_then(parse_port);
            } else if request.host.is_none() && line.contains(HOST_MARKER) {
                request.host = line.split_whitespace().nth(1).map(strip_port);
            }
        }

        if let Some(port) = port {
            request.port = port;
        }
        Some(request)
    }

    /// 按重定向策略改写目标地址与主机名，返回是否发生了改写。
    ///
    /// 只有目标地址命中了地址重定向表时才会继续查主机重定向表。
    pub fn redirect(&mut self, policy: &Policy) -> bool {
        let new_target = match self.target.as_deref().and_then(|t| policy.redirect_address(t)) {
            Some(t) => t.to_string(),
            None => return false,
        };
        self.target = Some(new_target);

        if let Some(new_host) = self.host.as_deref().and_then(|h| policy.redirect_host(h)) {
            self.host = Some(new_host.to_string());
        }
        self.redirected = true;
        true
    }

    /// 构造转发给上游的请求头，以 CRLF 分行并以空行结束。
    ///
    /// 未被重定向时逐行照搬原始请求头；被重定向时改写请求行和 Host 行。
    pub fn forward_block(&self) -> String {
        let mut block = String::with_capacity(self.raw.len() + 2 * CRLF.len());
        let mut request_line_done = false;
        let mut host_line_done = false;

        for line in self.raw.lines() {
            if !request_line_done && is_request_line(line) {
                request_line_done = true;
                if self.redirected {
                    block.push_str(&self.request_line());
                } else {
                    block.push_str(line);
                }
            } else if !host_line_done && line.contains(HOST_MARKER) {
                host_line_done = true;
                match self.host.as_deref() {
                    Some(host) if self.redirected => block.push_str(&self.host_line(host)),
                    _ => block.push_str(line),
                }
            } else {
                block.push_str(line);
            }
            block.push_str(CRLF);
        }
        block.push_str(CRLF);
        block
    }

    fn request_line(&self) -> String {
        [&self.method, &self.target, &self.version]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn host_line(&self, host: &str) -> String {
        if self.port == DEFAULT_PORT {
            format!("{}{}", HOST_MARKER, host)
        } else {
            format!("{}{}:{}", HOST_MARKER, host, self.port)
        }
    }

    /// 只有 GET 且目标地址非空的请求才使用缓存
    pub fn is_cacheable(&self) -> bool {
        self.method() == Some(HttpRequestMethod::Get)
            && self.target.as_deref().map_or(false, |t| !t.is_empty())
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取可识别的请求方法，无法识别时为 `None`
    pub fn method(&self) -> Option<HttpRequestMethod> {
        self.method.as_deref().and_then(HttpRequestMethod::from_token)
    }

    /// 获取请求行中原样的方法标记
    pub fn method_token(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_redirected(&self) -> bool {
        self.redirected
    }
}

fn is_request_line(line: &str) -> bool {
    HttpRequestMethod::ALL
        .iter()
        .any(|method| line.contains(method.as_str()))
}

/// 取出目标地址中可能表示端口的那一段。
///
/// 带 `http://`/`https://` 的地址因协议名自带一个冒号，端口在第三段；否则在第二段。
fn port_segment(target: &str) -> Option<&str> {
    let index = if target.contains("http://") || target.contains("https://") {
        2
    } else {
        1
    };
    target.split(':').nth(index)
}

/// 取端口段开头的十进制数字，如 `8080/index.html` 得到 8080
fn parse_port(token: &str) -> Option<u16> {
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn strip_port(host: &str) -> String {
    match host.find(':') {
        Some(index) => host[..index].to_string(),
        None => host.to_string(),
    }
}
