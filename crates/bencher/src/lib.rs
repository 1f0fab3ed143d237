//! Raw requests fed through a connection by the benchmarks.

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    request: &'static str,
}

impl TestCase {
    pub const fn new(name: &'static str, request: &'static str) -> Self {
        Self { name, request }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn request(&self) -> &'static [u8] {
        self.request.as_bytes()
    }
}

pub const SMALL_GET: TestCase = TestCase::new(
    "small_get",
    "GET /index.html HTTP/1.1\r\nHost: localhost\r\nUser-Agent: bench/1.0\r\nAccept: */*\r\n\r\n",
);

pub const LARGE_GET: TestCase = TestCase::new(
    "large_get",
    "GET /api/v1/items?page=3&size=50&sort=name HTTP/1.1\r\n\
     Host: www.example.com\r\n\
     User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0\r\n\
     Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
     Accept-Language: en-US,en;q=0.5\r\n\
     Accept-Encoding: gzip, deflate, br\r\n\
     Referer: https://www.example.com/api/v1/items?page=2&size=50&sort=name\r\n\
     Cookie: session=6f1c2a8e9b7d4e3f; theme=dark; lang=en; tracking=off; cart=17\r\n\
     Cache-Control: no-cache\r\n\
     Pragma: no-cache\r\n\
     Sec-Fetch-Dest: document\r\n\
     Sec-Fetch-Mode: navigate\r\n\
     Sec-Fetch-Site: same-origin\r\n\
     X-Request-Id: 2b7f0e94-4d1c-4f8a-9a53-7c0f5d1e6b20\r\n\
     X-Forwarded-For: 203.0.113.7, 198.51.100.23\r\n\
     \r\n",
);

pub const CHUNKED_POST: TestCase = TestCase::new(
    "chunked_post",
    "POST /upload HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n\
     10\r\n0123456789abcdef\r\n10\r\n0123456789abcdef\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n",
);

/// Every case, smallest first.
pub fn test_cases() -> [TestCase; 3] {
    [SMALL_GET, LARGE_GET, CHUNKED_POST]
}
