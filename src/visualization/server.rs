// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::path::PathBuf;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::{get, options, routes, Build, Request, Response, Rocket, State};

use crate::acquisition::{PlcRecord, SampleCache};

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new("Access-Control-Allow-Methods", "GET, OPTIONS"));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
    }
}

/// # Answers to OPTIONS requests
#[options("/<_path..>")]
async fn options(_path: PathBuf) -> Result<(), std::io::Error> {
    Ok(())
}

/// # Latest PLC sample
///
/// Returns the last decoded record as `{"Tag1":..,"Tag2":..,"Tag3":..,"Tag4":..}`.
/// Until the first successful read every tag is zero.
#[get("/")]
fn latest_sample(cache: &State<SampleCache>) -> Json<PlcRecord> {
    Json(cache.read().unwrap_or_default())
}

/// Build the read server on top of `figment`, serving samples from `cache`.
pub fn build_rocket(figment: Figment, cache: SampleCache) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(CORS)
        .mount("/", routes![latest_sample, options])
        .manage(cache)
}
