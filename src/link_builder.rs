use url::Url;

use crate::fields::ValidatedFields;

/// Deterministic serialization of a finalized field set into the redirect
/// target consumed by the payment-provider adapter. Pure and side-effect
/// free; absent fields are omitted entirely, never sent as empty strings.
pub struct LinkBuilder {
    endpoint: Url,
}

const PAY_PATH: &str = "pay-bolletta";

impl LinkBuilder {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut endpoint = Url::parse(base_url)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("payment base URL cannot be a base: {base_url}"))?
            .pop_if_empty()
            .push(PAY_PATH);
        Ok(Self { endpoint })
    }

    pub fn build(&self, fields: &ValidatedFields) -> String {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(amount) = fields.amount {
                query.append_pair("importo", &format!("{amount:.2}"));
            }
            if let Some(iban) = &fields.iban {
                query.append_pair("iban", iban);
            }
            query.append_pair("ente", &fields.ente);
            query.append_pair("descr", &fields.descr);
            if let Some(scadenza) = &fields.scadenza {
                query.append_pair("scadenza", scadenza);
            }
        }
        url.to_string()
    }
}
