use super::Notification;
use super::tier::Tier;
use crate::classifier::PurchaseEvent;
use alloy_primitives::Address;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// Static pieces of every purchase message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub token_symbol: String,
    pub quote_symbol: String,
    pub total_supply: f64,
    pub explorer_url: String,
    pub chart_url: Option<String>,
    pub buy_url: Option<String>,
    pub image: Option<PathBuf>,
}

impl MessageContext {
    fn buttons(&self) -> Vec<LinkButton> {
        let mut buttons = Vec::new();
        if let Some(url) = &self.chart_url {
            buttons.push(LinkButton {
                label: "📈 Chart".to_string(),
                url: url.clone(),
            });
        }
        if let Some(url) = &self.buy_url {
            buttons.push(LinkButton {
                label: "💵 Buy".to_string(),
                url: url.clone(),
            });
        }
        buttons
    }
}

pub fn render_purchase(event: &PurchaseEvent, tier: &Tier, ctx: &MessageContext) -> Notification {
    let market_cap = event.unit_price * ctx.total_supply;
    let buyer = format!("{}", event.buyer);
    let explorer = &ctx.explorer_url;

    let text = format!(
        "{emoji} <b>New {label} Buy!</b>\n\n\
         👤 <a href=\"{explorer}/address/{buyer}\">{short}</a>\n\
         💵 <b>${usd}</b> {quote}\n\
         💰 <b>{amount}</b> {symbol}\n\
         🏷️ <b>Price:</b> ${price}\n\
         🏷️ <b>Mcap:</b> ${mcap}\n\n\
         🔗 <a href=\"{explorer}/tx/{tx}\">View transaction</a>",
        emoji = tier.emoji,
        label = tier.label,
        short = short_address(&event.buyer),
        usd = format_number(event.usd_value, 2),
        quote = escape_html(&ctx.quote_symbol),
        amount = format_number(event.token_amount, 6),
        symbol = escape_html(&ctx.token_symbol),
        price = format_number(event.unit_price, 6),
        mcap = format_number(market_cap, 0),
        tx = event.tx_hash,
    );

    Notification {
        text,
        image: ctx.image.clone(),
        buttons: ctx.buttons(),
    }
}

pub fn render_holder_report(token_symbol: &str, holders: usize) -> Notification {
    Notification {
        text: format!(
            "📊 <b>Current {} Holders:</b> {}",
            escape_html(token_symbol),
            holders
        ),
        image: None,
        buttons: Vec::new(),
    }
}

/// `0x1234...abcd` from the checksummed address.
pub fn short_address(address: &Address) -> String {
    let full = format!("{address}");
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Fixed decimals with thousands separators, e.g. `1,234,567.89`.
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }

    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(formatted.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let negative = value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac_part) = frac_part {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
