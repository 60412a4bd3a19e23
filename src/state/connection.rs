//! Connection startup and authentication.

use std::collections::HashMap;

use tracing::debug;

use crate::conversion::text;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::{Authentication, BackendKeyData, BackendMessage};
use crate::protocol::frontend::auth::SCRAM_SHA_256;
use crate::protocol::frontend::{FrontendMessage, ScramClient, md5_password};

use super::{Exchange, State};

/// What the server told us during startup.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    process_id: u32,
    secret_key: u32,
    parameters: HashMap<String, String>,
}

impl Handshake {
    /// Backend process ID, used for cancellation.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Secret key, used for cancellation.
    pub fn secret_key(&self) -> u32 {
        self.secret_key
    }

    /// Server parameters reported before the first ReadyForQuery.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }
}

/// Startup parameters in the order they are sent.
pub(crate) fn startup_params(opts: &Opts) -> Vec<(String, String)> {
    let mut params = vec![("user".to_string(), opts.user.clone())];
    if let Some(database) = &opts.database {
        params.push(("database".to_string(), database.clone()));
    }
    params.push(("client_encoding".to_string(), "UTF8".to_string()));
    if let Some(app) = &opts.application_name {
        params.push(("application_name".to_string(), app.clone()));
    }
    params.extend(opts.params.iter().cloned());
    params
}

struct Startup<'a> {
    opts: &'a Opts,
    scram: Option<ScramClient>,
    key: Option<BackendKeyData>,
}

/// Run the startup sequence through the first ReadyForQuery.
///
/// Any failure here is fatal to the connection attempt.
pub(crate) async fn startup(exchange: &mut Exchange, opts: &Opts) -> Result<Handshake> {
    let mut startup = Startup {
        opts,
        scram: None,
        key: None,
    };
    let result = startup.run(exchange).await;
    if result.is_err() {
        exchange.engine().mark_broken();
    }
    result
}

impl Startup<'_> {
    async fn run(&mut self, exchange: &mut Exchange) -> Result<Handshake> {
        exchange.set_state(State::AwaitingAuthentication);
        exchange
            .send(vec![FrontendMessage::Startup {
                params: startup_params(self.opts),
            }])
            .await?;

        loop {
            match exchange.recv().await? {
                BackendMessage::ErrorResponse(err) => return Err(err.into_error()),
                BackendMessage::NegotiateProtocolVersion(negotiate) => {
                    debug!(
                        minor = negotiate.newest_minor_version,
                        unrecognized = ?negotiate.unrecognized_options,
                        "server negotiated protocol version"
                    );
                }
                BackendMessage::Authentication(auth) => self.authenticate(exchange, auth).await?,
                BackendMessage::BackendKeyData(key)
                    if exchange.state() == State::AwaitingStartupComplete =>
                {
                    self.key = Some(key);
                }
                BackendMessage::ReadyForQuery(_)
                    if exchange.state() == State::AwaitingStartupComplete =>
                {
                    exchange.set_state(State::Idle);
                    break;
                }
                msg => return Err(exchange.unexpected(&msg)),
            }
        }

        let key = self.key.unwrap_or_else(|| BackendKeyData::new(0, 0));
        Ok(Handshake {
            process_id: key.process_id(),
            secret_key: key.secret(),
            parameters: exchange.engine().server_params(),
        })
    }

    fn password(&self) -> Result<&str> {
        self.opts
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required".into()))
    }

    async fn authenticate(&mut self, exchange: &mut Exchange, auth: Authentication) -> Result<()> {
        match (exchange.state(), auth) {
            (State::AwaitingAuthentication | State::AwaitingAuthenticationOk, Authentication::Ok) => {
                exchange.set_state(State::AwaitingStartupComplete);
            }
            (State::AwaitingAuthentication, Authentication::CleartextPassword) => {
                let password = self.password()?.to_string();
                exchange.send(vec![FrontendMessage::Password(password)]).await?;
                exchange.set_state(State::AwaitingAuthenticationOk);
            }
            (State::AwaitingAuthentication, Authentication::Md5Password { salt }) => {
                let hashed = md5_password(&self.opts.user, self.password()?, &salt);
                exchange.send(vec![FrontendMessage::Password(hashed)]).await?;
                exchange.set_state(State::AwaitingAuthenticationOk);
            }
            (State::AwaitingAuthentication, Authentication::Sasl { mechanisms }) => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(Error::Unsupported(format!(
                        "SASL mechanisms {:?}",
                        mechanisms
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                let data = scram.client_first_message().into_bytes();
                self.scram = Some(scram);
                exchange
                    .send(vec![FrontendMessage::SaslInitialResponse {
                        mechanism: SCRAM_SHA_256.to_string(),
                        data,
                    }])
                    .await?;
                exchange.set_state(State::AwaitingSaslContinue);
            }
            (State::AwaitingSaslContinue, Authentication::SaslContinue(data)) => {
                let scram = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SASL continue without SASL start".into()))?;
                let client_final = scram.process_server_first(text(&data)?)?;
                exchange
                    .send(vec![FrontendMessage::SaslResponse(client_final.into_bytes())])
                    .await?;
                exchange.set_state(State::AwaitingSaslFinal);
            }
            (State::AwaitingSaslFinal, Authentication::SaslFinal(data)) => {
                let scram = self
                    .scram
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SASL final without SASL start".into()))?;
                scram.verify_server_final(text(&data)?)?;
                exchange.set_state(State::AwaitingAuthenticationOk);
            }
            (State::AwaitingAuthentication, other) => {
                return Err(Error::Unsupported(format!(
                    "authentication method {:?}",
                    other
                )));
            }
            (_, other) => return Err(exchange.unexpected(&BackendMessage::Authentication(other))),
        }
        Ok(())
    }
}
