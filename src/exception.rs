// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了代理服务器在单个连接的处理过程中可能出现的各类异常情况。
//!
//! 所有异常都只在所属连接的任务内部处理：记录日志、释放两端的 Socket，
//! 然后结束该连接。异常不会跨越连接边界，也不会以 HTTP 报文的形式返回给客户端。

use std::{fmt, io};

/// 代理处理请求过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 客户端在发送任何请求头之前就关闭了连接。
    EmptyRequest,
    /// 请求头超过了允许的最大长度，携带该上限。
    HeaderTooLarge(usize),
    /// 请求中没有可用的 `Host` 头，无法确定上游服务器。
    MissingHost,
    /// 无法连接到上游服务器，携带目标地址 `host:port`。
    UpstreamUnreachable(String),
    /// 发送重新验证请求后，上游在返回任何字节之前就关闭了连接。
    EmptyProbe,
    /// 配置文件不存在或无法读取。
    ConfigUnreadable(String),
    /// 配置文件内容无法解析为合法的配置对象。
    ConfigInvalid(String),
    /// 读写 Socket 或缓存文件时遇到的底层 I/O 错误。
    Io(io::Error),
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyRequest => write!(f, "Client closed before sending a request"),
            HeaderTooLarge(limit) => write!(f, "Request header exceeds {} bytes", limit),
            MissingHost => write!(f, "Request has no usable Host header"),
            UpstreamUnreachable(addr) => write!(f, "Couldn't connect to upstream {}", addr),
            EmptyProbe => write!(f, "Upstream closed before answering revalidation"),
            ConfigUnreadable(e) => write!(f, "Couldn't read config file: {}", e),
            ConfigInvalid(e) => write!(f, "Invalid config file: {}", e),
            Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e)
    }
}
