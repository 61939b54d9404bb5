//! Geolocation providers and the mapping from their JSON onto [`Info`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::{GeoError, Info};

/// A public geolocation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// ip-api.com (HTTP only on the free tier)
    IpApi,
    /// free.freeipapi.com (city-level data for China can be off)
    FreeIpApi,
    /// ifconfig.co
    Ifconfigco,
    /// ipwho.is
    IpWho,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::IpApi,
        Provider::FreeIpApi,
        Provider::Ifconfigco,
        Provider::IpWho,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Provider::IpApi => "ipapi",
            Provider::FreeIpApi => "freeipapi",
            Provider::Ifconfigco => "ifconfigco",
            Provider::IpWho => "ipwho",
        }
    }

    pub fn url(self, ip: &str) -> String {
        match self {
            Provider::IpApi => format!("http://ip-api.com/json/{ip}"),
            Provider::FreeIpApi => format!("https://free.freeipapi.com/api/json/{ip}"),
            Provider::Ifconfigco => format!("https://ifconfig.co/json?ip={ip}"),
            Provider::IpWho => format!("http://ipwho.is/{ip}"),
        }
    }

    /// Decode a provider response body.
    pub fn parse(self, body: &[u8]) -> Result<Info, GeoError> {
        match self {
            Provider::IpApi => serde_json::from_slice::<IpApiInfo>(body)?.into_info(),
            Provider::FreeIpApi => Ok(serde_json::from_slice::<FreeIpApiInfo>(body)?.into()),
            Provider::Ifconfigco => Ok(serde_json::from_slice::<IfconfigcoInfo>(body)?.into()),
            Provider::IpWho => serde_json::from_slice::<IpWhoInfo>(body)?.into_info(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown geo provider '{s}' (expected ipapi, freeipapi, ifconfigco or ipwho)")
            })
    }
}

fn join_address(parts: &[&str]) -> String {
    parts.join(" ")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiInfo {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: String,
    /// Region code
    #[serde(default)]
    region: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    org: String,
    #[serde(default)]
    query: String,
}

impl IpApiInfo {
    fn into_info(self) -> Result<Info, GeoError> {
        if self.status != "success" {
            let reason = self.message.unwrap_or(self.status);
            return Err(GeoError::Rejected(format!("ip-api status: {reason}")));
        }
        Ok(Info {
            address: join_address(&[&self.country, &self.region_name, &self.city, &self.org]),
            ip: self.query,
            country: self.country,
            region: self.region_name,
            region_code: self.region,
            city: self.city,
            city_code: String::new(),
            isp: self.isp,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreeIpApiInfo {
    ip_address: String,
    #[serde(default)]
    country_name: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city_name: String,
    #[serde(default)]
    zip_code: String,
    #[serde(default)]
    asn_organization: String,
}

impl From<FreeIpApiInfo> for Info {
    fn from(f: FreeIpApiInfo) -> Self {
        Info {
            address: join_address(&[&f.region_name, &f.city_name]),
            ip: f.ip_address,
            country: f.country_name,
            region: f.region_name,
            region_code: String::new(),
            city: f.city_name,
            city_code: f.zip_code,
            isp: f.asn_organization,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IfconfigcoInfo {
    ip: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    region_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    asn_org: String,
}

impl From<IfconfigcoInfo> for Info {
    fn from(i: IfconfigcoInfo) -> Self {
        Info {
            address: join_address(&[&i.country, &i.region_name, &i.city, &i.asn_org]),
            ip: i.ip,
            country: i.country,
            region: i.region_name,
            region_code: i.region_code,
            city: i.city,
            city_code: String::new(),
            isp: i.asn_org,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpWhoInfo {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    region_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    postal: String,
    #[serde(default)]
    connection: IpWhoConnection,
}

#[derive(Debug, Default, Deserialize)]
struct IpWhoConnection {
    #[serde(default)]
    org: String,
    #[serde(default)]
    isp: String,
}

impl IpWhoInfo {
    fn into_info(self) -> Result<Info, GeoError> {
        if !self.success {
            let reason = self.message.unwrap_or_else(|| "success is false".to_string());
            return Err(GeoError::Rejected(format!("ipwho: {reason}")));
        }
        Ok(Info {
            address: join_address(&[&self.country, &self.region, &self.city, &self.connection.org]),
            ip: self.ip,
            country: self.country,
            region: self.region,
            region_code: self.region_code,
            city: self.city,
            // postal code stands in for a city code
            city_code: self.postal,
            isp: self.connection.isp,
        })
    }
}
