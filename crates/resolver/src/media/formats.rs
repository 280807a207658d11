use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Hls,
    Mp4,
}

impl StreamFormat {
    pub fn as_str(&self) -> &str {
        match self {
            StreamFormat::Hls => "hls",
            StreamFormat::Mp4 => "mp4",
        }
    }

    pub fn from_extension(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mp4" | "m4v" => StreamFormat::Mp4,
            _ => StreamFormat::Hls,
        }
    }

    /// Guesses the format from the path of a media url, ignoring the query string.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path.rsplit_once('.')
            .filter(|(_, ext)| !ext.contains('/'))
            .map(|(_, ext)| Self::from_extension(ext))
            .unwrap_or_default()
    }
}

impl Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StreamFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hls" | "m3u8" => Ok(StreamFormat::Hls),
            "mp4" => Ok(StreamFormat::Mp4),
            _ => Err(()),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "tv" | "series" | "show" => Ok(MediaType::Tv),
            _ => Err(()),
        }
    }
}
