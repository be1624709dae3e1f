use clap::Parser;

/// Every option defaults to the shipped configuration: listen on 3307,
/// forward to a MySQL server on 127.0.0.1:3306, credentials from the working
/// directory.
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "tag-proxy",
    version = "0.1.0",
    about = "mysql proxy that attributes shared-account queries to end users."
)]
pub struct ProxyServerArgs {
    #[clap(long, value_name = "WORKS", default_value_t = 4)]
    pub works: usize,
    #[clap(long, value_name = "PORT", default_value_t = 3307)]
    pub port: u16,
    #[clap(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub upstream_host: String,
    #[clap(long, value_name = "PORT", default_value_t = 3306)]
    pub upstream_port: u16,
    #[clap(long, value_name = "FILE", default_value = "proxyacct.json")]
    pub service_account_file: String,
    #[clap(long, value_name = "FILE", default_value = "proxyauthn.json")]
    pub user_file: String,
    #[clap(long, value_name = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl ProxyServerArgs {
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
