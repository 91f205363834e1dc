// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接处理模块
//!
//! 每个被接受的客户端连接都由 `ProxyHandler` 走完下面的状态机：
//!
//! ```text
//! 读取请求头 -> 检查用户屏蔽 -> 解析 -> (443? 丢弃) -> 检查网址屏蔽
//!   -> (拒绝 | 重定向? -> 连接上游 -> (GET? 缓存流程 : 直接转发)) -> 关闭
//! ```
//!
//! 处理器独占客户端 Socket 与上游 Socket，任何 I/O 错误都只会终止当前连接。
//! 无论以哪种状态结束，客户端 Socket 都经由 [`close`] 关闭：先关闭写方向，
//! 再读掉客户端尚未被读取的请求体，带着未读数据关闭 Socket 会让内核发出 RST，
//! 客户端还没读到的响应随之丢失。

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use log::{debug, info, warn};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use crate::{
    cache::{CacheHit, CacheState, CacheWriter, DiskCache},
    config::Config,
    exception::Exception,
    param::*,
    policy::Policy,
    request::Request,
    upstream,
};

/// 一个连接的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 客户端地址被屏蔽
    UserBanned,
    /// 目标网址被屏蔽
    SiteForbidden,
    /// 空请求或 HTTPS 请求，未作任何应答
    Dropped,
    /// 不经过缓存，直接转发上游响应
    Passthrough,
    /// 经过缓存流程
    Cached(CacheState),
}

pub struct ProxyHandler {
    policy: Arc<Policy>,
    cache: DiskCache,
    chunk_size: usize,
    probe_size: usize,
    max_header_size: usize,
}

impl ProxyHandler {
    pub fn new(config: &Config) -> Self {
        Self {
            policy: Arc::new(config.policy().clone()),
            cache: DiskCache::new(PathBuf::from(config.cache_dir()), config.cache_size()),
            chunk_size: config.chunk_size(),
            probe_size: config.probe_size(),
            max_header_size: config.max_header_size(),
        }
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// 处理一个连接直到结束，记录结果后关闭客户端 Socket
    pub async fn dispatch(&self, mut client: TcpStream, peer: SocketAddr, id: u128) {
        match self.handle(&mut client, peer, id).await {
            Ok(outcome) => info!("[ID{}]{} 处理完成：{:?}", id, peer, outcome),
            Err(Exception::EmptyRequest) => debug!("[ID{}]客户端未发送请求即关闭", id),
            Err(e) => warn!("[ID{}]连接异常终止：{}", id, e),
        }
        match close(&mut client).await {
            Ok(0) => {}
            Ok(drained) => debug!("[ID{}]关闭前丢弃了客户端剩余的{}字节", id, drained),
            Err(e) => debug!("[ID{}]关闭客户端连接时出错：{}", id, e),
        }
    }

    pub async fn handle(
        &self,
        client: &mut TcpStream,
        peer: SocketAddr,
        id: u128,
    ) -> Result<Outcome, Exception> {
        let header = read_header_block(client, self.max_header_size).await?;

        // 用户屏蔽先于解析，格式错误的请求同样会被拒绝
        let client_address = peer.ip().to_string();
        if self.policy.is_user_banned(&client_address) {
            info!("[ID{}]当前用户{}已被禁止访问", id, client_address);
            deny(client, USER_BANNED_MESSAGE).await?;
            return Ok(Outcome::UserBanned);
        }

        let mut request = match Request::parse(&header) {
            Some(request) => request,
            None => return Err(Exception::EmptyRequest),
        };

        // 代理只能处理 HTTP，HTTPS 请求直接丢弃
        if request.port() == HTTPS_PORT {
            debug!("[ID{}]丢弃发往443端口的请求：{:?}", id, request.target());
            return Ok(Outcome::Dropped);
        }

        debug!(
            "[ID{}]获取到一个来自{}的请求：{:?} {:?} {:?} host={:?} port={}",
            id,
            client_address,
            request.method_token(),
            request.target(),
            request.version(),
            request.host(),
            request.port()
        );

        if let Some(target) = request.target() {
            if self.policy.is_site_forbidden(target) {
                info!("[ID{}]站点{}已被禁止访问", id, target);
                deny(client, SITE_FORBIDDEN_MESSAGE).await?;
                return Ok(Outcome::SiteForbidden);
            }
        }

        let original_target = request.target().map(str::to_string);
        if request.redirect(&self.policy) {
            info!(
                "[ID{}]重定向：{:?} -> {:?}，主机：{:?}",
                id,
                original_target,
                request.target(),
                request.host()
            );
        }

        let host = request.host().ok_or(Exception::MissingHost)?;
        let mut upstream = upstream::connect(host, request.port()).await?;

        if request.is_cacheable() {
            let state = self.relay_cached(&request, client, &mut upstream, id).await?;
            Ok(Outcome::Cached(state))
        } else {
            self.relay_direct(&request, client, &mut upstream, id).await?;
            Ok(Outcome::Passthrough)
        }
    }

    /// 不使用缓存：转发请求头，再把上游响应原样交给客户端
    async fn relay_direct(
        &self,
        request: &Request,
        client: &mut TcpStream,
        upstream: &mut TcpStream,
        id: u128,
    ) -> Result<(), Exception> {
        upstream::send_request(upstream, request.forward_block().as_bytes()).await?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = upstream.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            client.write_all(&buffer[..n]).await?;
            total += n as u64;
        }
        client.flush().await?;
        debug!("[ID{}]直接转发完成，共{}字节", id, total);
        Ok(())
    }

    async fn relay_cached(
        &self,
        request: &Request,
        client: &mut TcpStream,
        upstream: &mut TcpStream,
        id: u128,
    ) -> Result<CacheState, Exception> {
        let key = request.target().unwrap_or_default();
        match self.cache.lookup(key).await? {
            Some(hit) => {
                debug!("[ID{}]{}缓存命中", id, key);
                self.revalidate(request, &hit, client, upstream, id).await
            }
            None => {
                debug!("[ID{}]{}缓存未命中", id, key);
                self.fetch_and_store(request, client, upstream, id).await?;
                Ok(CacheState::Miss)
            }
        }
    }

    /// 缓存命中：发送条件请求，按上游的回答决定使用记录还是重建记录
    async fn revalidate(
        &self,
        request: &Request,
        hit: &CacheHit,
        client: &mut TcpStream,
        upstream: &mut TcpStream,
        id: u128,
    ) -> Result<CacheState, Exception> {
        let key = request.target().unwrap_or_default();
        let conditional = upstream::revalidation_request(
            request.method_token().unwrap_or("GET"),
            key,
            request.host().unwrap_or_default(),
            hit.last_modified(),
        );
        upstream::send_request(upstream, conditional.as_bytes()).await?;

        let mut probe = vec![0u8; self.probe_size];
        let n = upstream.read(&mut probe).await?;
        if n == 0 {
            return Err(Exception::EmptyProbe);
        }
        probe.truncate(n);

        if upstream::is_not_modified(&probe) {
            info!("[ID{}]{}缓存内容未更新，直接使用", id, key);
            let mut body = self.cache.open_body(hit).await?;
            let sent = tokio::io::copy(&mut body, client).await?;
            client.flush().await?;
            debug!("[ID{}]从缓存发送{}字节", id, sent);
            return Ok(CacheState::Fresh);
        }

        info!("[ID{}]{}缓存内容已更新，重新缓存", id, key);
        let mut writer = self.cache.replace(hit, key).await?;
        client.write_all(&probe).await?;
        writer.write(&probe).await?;
        let stored = tee(upstream, client, &mut writer, self.chunk_size).await?;
        let written = writer.finish(&self.cache).await?;
        debug!("[ID{}]缓存已重建，转发{}字节，写入{}字节", id, stored + n as u64, written);
        Ok(CacheState::Stale)
    }

    /// 缓存未命中：转发原始请求，把响应同时写给客户端和新的缓存记录
    async fn fetch_and_store(
        &self,
        request: &Request,
        client: &mut TcpStream,
        upstream: &mut TcpStream,
        id: u128,
    ) -> Result<(), Exception> {
        upstream::send_request(upstream, request.forward_block().as_bytes()).await?;

        let key = request.target().unwrap_or_default();
        let path = self.cache.record_path(request.host().unwrap_or_default());
        let mut writer = self.cache.create(&path, key).await?;
        tee(upstream, client, &mut writer, self.chunk_size).await?;
        let written = writer.finish(&self.cache).await?;
        debug!("[ID{}]新建缓存{}，写入{}字节", id, path.display(), written);
        Ok(())
    }
}

/// 读取请求头直到空行或 EOF，各行统一以 CRLF 结尾。请求体不会被读取。
///
/// 读到的字节数（含换行）超过 `limit` 时返回 [`Exception::HeaderTooLarge`]。
pub async fn read_header_block<R>(stream: &mut R, limit: usize) -> Result<String, Exception>
where
    R: AsyncRead + Unpin,
{
    // 多读一个字节，用来区分恰好达到上限和超出上限
    let mut reader = BufReader::new(stream.take(limit as u64 + 1));
    let mut block = String::new();
    let mut line = Vec::new();
    let mut consumed = 0usize;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            break;
        }
        consumed += n;
        if consumed > limit {
            return Err(Exception::HeaderTooLarge(limit));
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(|c: char| c == '\r' || c == '\n');
        if text.is_empty() {
            break;
        }
        block.push_str(text);
        block.push_str(CRLF);
    }
    Ok(block)
}

/// 写出纯文本的拒绝提示，连接随后由 [`close`] 关闭
async fn deny<W>(client: &mut W, message: &str) -> Result<(), Exception>
where
    W: AsyncWrite + Unpin,
{
    client.write_all(message.as_bytes()).await?;
    client.write_all(b"\n").await?;
    client.flush().await?;
    Ok(())
}

/// 关闭写方向，然后丢弃客户端剩余的输入，直到 EOF、超过 [`DRAIN_LIMIT`]
/// 或等待超过 [`DRAIN_TIMEOUT`]。返回丢弃的字节数。
pub async fn close<S>(client: &mut S) -> Result<u64, Exception>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    client.shutdown().await?;
    let mut rest = client.take(DRAIN_LIMIT);
    let drained = timeout(DRAIN_TIMEOUT, io::copy(&mut rest, &mut io::sink()))
        .await
        .unwrap_or(Ok(0))?;
    Ok(drained)
}

/// 把上游剩余的字节同时复制给客户端和缓存记录，直到上游关闭
async fn tee<R, W>(
    upstream: &mut R,
    client: &mut W,
    writer: &mut CacheWriter,
    chunk_size: usize,
) -> Result<u64, Exception>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = upstream.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        client.write_all(&buffer[..n]).await?;
        writer.write(&buffer[..n]).await?;
        total += n as u64;
    }
    client.flush().await?;
    Ok(total)
}
