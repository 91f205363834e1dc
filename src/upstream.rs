// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 上游连接模块
//!
//! 每个客户端连接都会新建一条到上游服务器的 TCP 连接，不做复用。
//! 请求发送完毕后立即关闭写方向，告知上游请求已经完整；请求体从不转发。

use log::debug;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

use crate::{exception::Exception, param::*};

/// 连接上游服务器
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, Exception> {
    let address = format!("{}:{}", host, port);
    match TcpStream::connect(&address).await {
        Ok(stream) => {
            debug!("已连接上游{}", address);
            Ok(stream)
        }
        Err(e) => {
            debug!("无法连接上游{}: {}", address, e);
            Err(Exception::UpstreamUnreachable(address))
        }
    }
}

/// 发送请求并关闭写方向
pub async fn send_request<W>(upstream: &mut W, request: &[u8]) -> Result<(), Exception>
where
    W: AsyncWrite + Unpin,
{
    upstream.write_all(request).await?;
    upstream.flush().await?;
    upstream.shutdown().await?;
    Ok(())
}

/// 构造重新验证用的条件请求。
///
/// 没有新鲜度令牌时省略 `If-Modified-Since`，上游会返回完整内容。
pub fn revalidation_request(
    method: &str,
    target: &str,
    host: &str,
    last_modified: Option<&str>,
) -> String {
    let mut request = format!("{} {} HTTP/1.1{}", method, target, CRLF);
    request.push_str(&format!("Host: {}{}", host, CRLF));
    for (name, value) in STANDARD_HEADERS {
        request.push_str(&format!("{}: {}{}", name, value, CRLF));
    }
    if let Some(date) = last_modified {
        request.push_str(&format!("If-Modified-Since: {}{}", date, CRLF));
    }
    request.push_str(CRLF);
    request
}

/// 根据响应开头的一小段判断上游是否返回了“未修改”。
///
/// 只看状态行的第二个字段，探测数据不足一整行时按已有内容判断。
pub fn is_not_modified(probe: &[u8]) -> bool {
    let text = String::from_utf8_lossy(probe);
    text.lines()
        .next()
        .and_then(|status_line| status_line.split_whitespace().nth(1))
        .map_or(false, |code| code == NOT_MODIFIED)
}
